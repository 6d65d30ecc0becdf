//! Binary header of a timeline file (all integers big-endian):
//!
//! ```text
//! magic: u32 "TLN1"      version: u32
//! metadata_len: u32      metadata: bytes
//! sample_rate: u32       num_datagrams: u64      total_duration: u64
//! index_interval_secs: f64
//! index_len: u32         index: (time: u64, byte_offset: u64) * index_len
//! data_len: u64          header_crc32: u32       data_start: u64
//! record area: ([payload_len: u32][duration: u64][payload])*
//! ```
//!
//! The checksum covers every header byte in front of it.

use crate::timeline::index::{interval_samples, Checkpoint, Index};
use crate::timeline::record::RECORD_HEADER_SIZE;
use crate::timeline::{Result, TimelineError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc32fast::Hasher as Crc32;
use std::io::Read;

pub const MAGIC: u32 = u32::from_be_bytes(*b"TLN1");
pub const VERSION: u32 = 1;

const CHECKPOINT_SIZE: u64 = 16;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TimelineHeader {
    pub metadata: Bytes,
    pub sample_rate: u32,
    pub num_datagrams: u64,
    pub total_duration: u64,
    pub index_interval_secs: f64,
    pub index: Index,
    pub data_len: u64,
}

impl TimelineHeader {
    /// Serializes the header, checksum and record-area offset included.
    pub fn encode(&self) -> Result<BytesMut> {
        let metadata_len = u32::try_from(self.metadata.len()).map_err(|_| {
            TimelineError::invalid_argument(format!(
                "metadata block of {} bytes is too large",
                self.metadata.len()
            ))
        })?;
        let index_len = u32::try_from(self.index.len()).map_err(|_| {
            TimelineError::invalid_argument(format!(
                "index of {} checkpoints is too large",
                self.index.len()
            ))
        })?;

        let mut buf = BytesMut::with_capacity(
            64 + self.metadata.len() + self.index.len() * CHECKPOINT_SIZE as usize,
        );
        buf.put_u32(MAGIC);
        buf.put_u32(VERSION);
        buf.put_u32(metadata_len);
        buf.put_slice(&self.metadata);
        buf.put_u32(self.sample_rate);
        buf.put_u64(self.num_datagrams);
        buf.put_u64(self.total_duration);
        buf.put_f64(self.index_interval_secs);
        buf.put_u32(index_len);
        for checkpoint in self.index.checkpoints() {
            buf.put_u64(checkpoint.time);
            buf.put_u64(checkpoint.byte_offset);
        }
        buf.put_u64(self.data_len);

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        buf.put_u32(hasher.finalize());

        let data_start = buf.len() as u64 + 8;
        buf.put_u64(data_start);
        Ok(buf)
    }

    /// Parses and validates a header from the start of a file of `file_len`
    /// bytes. Returns the header and the absolute offset of the record area.
    pub fn decode<R: Read>(reader: R, file_len: u64) -> Result<(Self, u64)> {
        let mut r = HeaderReader {
            inner: reader,
            crc: Crc32::new(),
            consumed: 0,
            file_len,
        };

        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(TimelineError::malformed(format!(
                "bad magic number {:#010x}",
                magic
            )));
        }
        let version = r.u32()?;
        if version != VERSION {
            return Err(TimelineError::malformed(format!(
                "unsupported format version {}",
                version
            )));
        }

        let metadata_len = r.u32()? as usize;
        let metadata = Bytes::from(r.bytes(metadata_len)?);
        let sample_rate = r.u32()?;
        let num_datagrams = r.u64()?;
        let total_duration = r.u64()?;
        let index_interval_secs = f64::from_bits(r.u64()?);

        let index_len = r.u32()? as u64;
        let raw = r.bytes((index_len * CHECKPOINT_SIZE) as usize)?;
        let mut raw_index = &raw[..];
        let mut checkpoints = Vec::with_capacity(index_len as usize);
        while raw_index.has_remaining() {
            checkpoints.push(Checkpoint {
                time: raw_index.get_u64(),
                byte_offset: raw_index.get_u64(),
            });
        }

        let data_len = r.u64()?;
        let computed_crc = r.crc.clone().finalize();
        let stored_crc = r.u32()?;
        if computed_crc != stored_crc {
            return Err(TimelineError::malformed(format!(
                "header checksum mismatch (stored {:#010x}, computed {:#010x})",
                stored_crc, computed_crc
            )));
        }
        let data_start = r.u64()?;
        if data_start != r.consumed {
            return Err(TimelineError::malformed(format!(
                "record area declared at byte {}, header ends at byte {}",
                data_start, r.consumed
            )));
        }
        if data_start.checked_add(data_len) != Some(file_len) {
            return Err(TimelineError::malformed(format!(
                "file is {} bytes, header declares {} + {}",
                file_len, data_start, data_len
            )));
        }

        if sample_rate == 0 {
            return Err(TimelineError::malformed("native sample rate is zero"));
        }
        let min_data_len = num_datagrams
            .checked_mul(RECORD_HEADER_SIZE as u64)
            .ok_or_else(|| TimelineError::malformed("record count overflows"))?;
        if data_len < min_data_len {
            return Err(TimelineError::malformed(format!(
                "{} records cannot fit in {} bytes",
                num_datagrams, data_len
            )));
        }
        if num_datagrams == 0 && (data_len != 0 || total_duration != 0) {
            return Err(TimelineError::malformed(
                "empty timeline declares data or duration",
            ));
        }

        let interval = interval_samples(index_interval_secs, sample_rate)
            .map_err(|e| TimelineError::malformed(e.to_string()))?;
        let index = Index::from_parts(interval, checkpoints, data_len, total_duration)?;

        Ok((
            Self {
                metadata,
                sample_rate,
                num_datagrams,
                total_duration,
                index_interval_secs,
                index,
                data_len,
            },
            data_start,
        ))
    }
}

/// Reads header fields while checksumming them and refusing to run past the
/// end of the file.
struct HeaderReader<R> {
    inner: R,
    crc: Crc32,
    consumed: u64,
    file_len: u64,
}

impl<R: Read> HeaderReader<R> {
    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.consumed + n as u64 > self.file_len {
            return Err(TimelineError::malformed(format!(
                "header truncated at byte {} of {}",
                self.consumed, self.file_len
            )));
        }
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf)?;
        self.crc.update(&buf);
        self.consumed += n as u64;
        Ok(buf)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok((&self.bytes(4)?[..]).get_u32())
    }

    fn u64(&mut self) -> Result<u64> {
        Ok((&self.bytes(8)?[..]).get_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::index::IndexBuilder;

    fn sample_header() -> TimelineHeader {
        let mut builder = IndexBuilder::new(4);
        builder.feed(5, 30);
        builder.feed(9, 60);
        TimelineHeader {
            metadata: Bytes::from_static(b"voice=test\n"),
            sample_rate: 1000,
            num_datagrams: 3,
            total_duration: 9,
            index_interval_secs: 0.004,
            index: builder.finish(),
            data_len: 60,
        }
    }

    fn file_with_data(header: &TimelineHeader) -> Vec<u8> {
        let mut file = header.encode().unwrap().to_vec();
        file.extend(std::iter::repeat(0u8).take(header.data_len as usize));
        file
    }

    #[test]
    fn header_decodes_what_it_encodes() {
        let header = sample_header();
        let file = file_with_data(&header);
        let (decoded, data_start) = TimelineHeader::decode(&file[..], file.len() as u64).unwrap();

        assert_eq!(decoded, header);
        assert_eq!(data_start, file.len() as u64 - header.data_len);
        assert_eq!(&file[0..4], b"TLN1");
    }

    #[test]
    fn corrupted_byte_fails_checksum() {
        let header = sample_header();
        let mut file = file_with_data(&header);
        // Inside the metadata block.
        file[14] ^= 0xff;
        let err = TimelineHeader::decode(&file[..], file.len() as u64).unwrap_err();
        assert!(err.to_string().contains("checksum"), "{}", err);
    }

    #[test]
    fn bad_magic_is_malformed() {
        let header = sample_header();
        let mut file = file_with_data(&header);
        file[0] = b'X';
        let err = TimelineHeader::decode(&file[..], file.len() as u64).unwrap_err();
        assert!(matches!(err, TimelineError::Malformed { .. }));
    }

    #[test]
    fn truncated_record_area_is_malformed() {
        let header = sample_header();
        let file = file_with_data(&header);
        let cut = &file[..file.len() - 1];
        let err = TimelineHeader::decode(cut, cut.len() as u64).unwrap_err();
        assert!(err.to_string().contains("header declares"), "{}", err);
    }

    #[test]
    fn truncated_header_is_malformed() {
        let header = sample_header();
        let file = file_with_data(&header);
        let cut = &file[..20];
        let err = TimelineHeader::decode(cut, cut.len() as u64).unwrap_err();
        assert!(matches!(err, TimelineError::Malformed { .. }));
    }
}
