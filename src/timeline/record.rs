//! Defines `Datagram`, the atomic unit of a timeline, and its on-disk header.

use crate::timeline::{Result, TimelineError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Bytes in front of every payload: `[payload_len: u32][duration: u64]`.
pub const RECORD_HEADER_SIZE: usize = 12;

/// A duration (in samples at the timeline's native rate) plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    duration: u64,
    payload: Bytes,
}

impl Datagram {
    pub fn new(duration: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            duration,
            payload: payload.into(),
        }
    }

    /// One frame of 16-bit PCM audio; the duration is the sample count.
    pub fn from_pcm16(samples: &[i16]) -> Self {
        let mut buf = BytesMut::with_capacity(samples.len() * 2);
        for &s in samples {
            buf.put_i16(s);
        }
        Self::new(samples.len() as u64, buf.freeze())
    }

    /// A parameter vector (mel-cepstrum, LSF, ...) covering `duration` samples.
    pub fn from_frame(duration: u64, values: &[f32]) -> Self {
        let mut buf = BytesMut::with_capacity(values.len() * 4);
        for &v in values {
            buf.put_f32(v);
        }
        Self::new(duration, buf.freeze())
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Size of this record in the record area, header included.
    pub fn encoded_len(&self) -> u64 {
        (RECORD_HEADER_SIZE + self.payload.len()) as u64
    }

    /// Decodes the payload as big-endian 16-bit PCM.
    pub fn pcm16_samples(&self) -> Result<Vec<i16>> {
        if self.payload.len() % 2 != 0 {
            return Err(TimelineError::invalid_argument(format!(
                "payload of {} bytes is not 16-bit PCM",
                self.payload.len()
            )));
        }
        let mut data = &self.payload[..];
        let mut samples = Vec::with_capacity(data.len() / 2);
        while data.has_remaining() {
            samples.push(data.get_i16());
        }
        Ok(samples)
    }

    /// Decodes the payload as a big-endian `f32` vector.
    pub fn frame_values(&self) -> Result<Vec<f32>> {
        if self.payload.len() % 4 != 0 {
            return Err(TimelineError::invalid_argument(format!(
                "payload of {} bytes is not an f32 frame",
                self.payload.len()
            )));
        }
        let mut data = &self.payload[..];
        let mut values = Vec::with_capacity(data.len() / 4);
        while data.has_remaining() {
            values.push(data.get_f32());
        }
        Ok(values)
    }

    pub(crate) fn with_duration(mut self, duration: u64) -> Self {
        self.duration = duration;
        self
    }

    pub(crate) fn header(&self) -> Result<RecordHeader> {
        let payload_len = u32::try_from(self.payload.len()).map_err(|_| {
            TimelineError::RecordTooLarge {
                len: self.payload.len(),
            }
        })?;
        Ok(RecordHeader {
            payload_len,
            duration: self.duration,
        })
    }
}

/// Fixed-size prefix of a record in the record area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordHeader {
    pub payload_len: u32,
    pub duration: u64,
}

impl RecordHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.payload_len);
        buf.put_u64(self.duration);
    }

    pub fn decode(mut raw: &[u8]) -> Self {
        debug_assert!(raw.len() >= RECORD_HEADER_SIZE);
        let payload_len = raw.get_u32();
        let duration = raw.get_u64();
        Self {
            payload_len,
            duration,
        }
    }

    /// Bytes occupied by the whole record.
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.payload_len as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_twelve_bytes() {
        let dg = Datagram::new(441, vec![7u8; 5]);
        let mut buf = BytesMut::new();
        dg.header().unwrap().encode(&mut buf);

        assert_eq!(buf.len(), RECORD_HEADER_SIZE);
        assert_eq!(&buf[0..4], &5u32.to_be_bytes());
        assert_eq!(&buf[4..12], &441u64.to_be_bytes());

        let header = RecordHeader::decode(&buf);
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.duration, 441);
        assert_eq!(header.record_len(), 17);
        assert_eq!(dg.encoded_len(), 17);
    }

    #[test]
    fn pcm_frames_decode() {
        let dg = Datagram::from_pcm16(&[0, -1, i16::MAX, i16::MIN]);
        assert_eq!(dg.duration(), 4);
        assert_eq!(dg.len(), 8);
        assert_eq!(dg.pcm16_samples().unwrap(), vec![0, -1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn parameter_frames_decode() {
        let dg = Datagram::from_frame(80, &[1.5, -0.25, 0.0]);
        assert_eq!(dg.duration(), 80);
        assert_eq!(dg.frame_values().unwrap(), vec![1.5, -0.25, 0.0]);
    }

    #[test]
    fn odd_payload_is_not_pcm() {
        let dg = Datagram::new(1, vec![1u8, 2, 3]);
        assert!(dg.pcm16_samples().is_err());
        assert!(dg.frame_values().is_err());
    }

    #[test]
    fn empty_payload_is_legal() {
        let dg = Datagram::new(0, Bytes::new());
        assert!(dg.is_empty());
        assert_eq!(dg.encoded_len(), RECORD_HEADER_SIZE as u64);
        assert!(dg.pcm16_samples().unwrap().is_empty());
    }
}
