//! Time-indexed random access over a closed timeline.
//!
//! A query jumps to the index checkpoint at or before the target time, then
//! skips record headers forward until it reaches the record whose half-open
//! interval `[start, start + duration)` contains the target.

use crate::timeline::config::ReaderOptions;
use crate::timeline::index::Index;
use crate::timeline::io::{FileSource, MappedSource, PositionalRead};
use crate::timeline::layout::TimelineHeader;
use crate::timeline::rate::RateAdapter;
use crate::timeline::record::{Datagram, RecordHeader, RECORD_HEADER_SIZE};
use crate::timeline::{Result, TimelineError};
use bytes::Bytes;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Position in the record area plus the elapsed time at that position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    byte_pos: u64,
    time_pos: u64,
}

impl Cursor {
    /// The first record of the timeline.
    pub fn start() -> Self {
        Self::default()
    }

    /// Offset from the start of the record area.
    pub fn byte_position(&self) -> u64 {
        self.byte_pos
    }

    /// Elapsed native samples before the record under the cursor.
    pub fn time_position(&self) -> u64 {
        self.time_pos
    }

    fn advance(&mut self, header: &RecordHeader) {
        self.byte_pos += header.record_len();
        self.time_pos = self.time_pos.saturating_add(header.duration);
    }
}

/// Records touched by a range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRead {
    pub records: Vec<Datagram>,
    /// Native samples between the start of the first record and the query time.
    pub leading_offset: u64,
}

/// One entry of a batch of range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeQuery {
    pub time: u64,
    pub span: u64,
    pub sample_rate: u32,
}

/// Serializable summary of an open timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineInfo {
    pub path: PathBuf,
    pub source: &'static str,
    pub sample_rate: u32,
    pub num_datagrams: u64,
    pub total_duration: u64,
    pub total_seconds: f64,
    pub index_interval_secs: f64,
    pub index_len: usize,
    pub metadata_len: usize,
    pub data_start: u64,
    pub data_len: u64,
}

pub struct TimelineReader {
    path: PathBuf,
    header: TimelineHeader,
    data_start: u64,
    rate: RateAdapter,
    source: Box<dyn PositionalRead>,
}

impl TimelineReader {
    /// Opens a closed timeline, mapping the record area when `use_mmap` is set.
    pub fn open(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let options = if use_mmap {
            ReaderOptions::mapped()
        } else {
            ReaderOptions::streamed()
        };
        Self::open_with_options(path, &options)
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open_with_options(path: impl AsRef<Path>, options: &ReaderOptions) -> Result<Self> {
        let start = Instant::now();
        options.validate()?;
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let (header, data_start) = TimelineHeader::decode(BufReader::new(&file), file_len)?;

        let source: Box<dyn PositionalRead> = if options.use_mmap {
            Box::new(MappedSource::new(
                &file,
                data_start,
                header.data_len,
                options.map_window_bytes,
            )?)
        } else {
            Box::new(FileSource::new(file, data_start, header.data_len))
        };

        let reader = Self {
            path,
            rate: RateAdapter::new(header.sample_rate),
            header,
            data_start,
            source,
        };
        if options.verify_on_open {
            reader.verify()?;
        }

        info!(
            source = reader.source.name(),
            sample_rate = reader.header.sample_rate,
            num_datagrams = reader.header.num_datagrams,
            total_duration = reader.header.total_duration,
            index_len = reader.header.index.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Timeline opened"
        );
        Ok(reader)
    }

    /// Walks every record header and checks count, duration and extent
    /// against the file header, and every index checkpoint against the record
    /// boundary it names.
    fn verify(&self) -> Result<()> {
        let checkpoints = self.header.index.checkpoints();
        let mut next_checkpoint = 0;
        let mut cursor = Cursor::start();
        let mut count = 0u64;
        loop {
            while let Some(checkpoint) = checkpoints.get(next_checkpoint) {
                if checkpoint.byte_offset > cursor.byte_pos {
                    break;
                }
                if checkpoint.byte_offset < cursor.byte_pos || checkpoint.time != cursor.time_pos {
                    return Err(TimelineError::malformed(format!(
                        "index checkpoint {:?} does not match the record boundary at byte {} (time {})",
                        checkpoint, cursor.byte_pos, cursor.time_pos
                    )));
                }
                next_checkpoint += 1;
            }
            if cursor.byte_pos >= self.data_len() {
                break;
            }
            let header = self.record_header(cursor.byte_pos)?;
            cursor.time_pos = cursor.time_pos.checked_add(header.duration).ok_or_else(|| {
                TimelineError::malformed("record durations overflow 64 bits")
            })?;
            cursor.byte_pos += header.record_len();
            count += 1;
        }
        if count != self.header.num_datagrams {
            return Err(TimelineError::malformed(format!(
                "header declares {} records, record area holds {}",
                self.header.num_datagrams, count
            )));
        }
        if cursor.time_pos != self.header.total_duration {
            return Err(TimelineError::malformed(format!(
                "header declares total duration {}, records sum to {}",
                self.header.total_duration, cursor.time_pos
            )));
        }
        debug!(records = count, "Record area verified");
        Ok(())
    }

    /// Reads the record header at `pos`, refusing records that run past the
    /// end of the record area.
    fn record_header(&self, pos: u64) -> Result<RecordHeader> {
        let end = self.data_len();
        if pos + RECORD_HEADER_SIZE as u64 > end {
            return Err(TimelineError::malformed(format!(
                "record at byte {} is truncated (record area ends at {})",
                pos, end
            )));
        }
        let mut raw = [0u8; RECORD_HEADER_SIZE];
        self.source.read_exact_at(pos, &mut raw)?;
        let header = RecordHeader::decode(&raw);
        if pos + header.record_len() > end {
            return Err(TimelineError::malformed(format!(
                "record at byte {} claims {} payload bytes past the record area end {}",
                pos, header.payload_len, end
            )));
        }
        Ok(header)
    }

    /// Header of the record under `cursor`; exhaustion at the end of data.
    fn peek(&self, cursor: &Cursor) -> Result<RecordHeader> {
        if cursor.byte_pos >= self.data_len() {
            return Err(TimelineError::Exhausted {
                unit: "byte",
                position: cursor.byte_pos,
                end: self.data_len(),
            });
        }
        self.record_header(cursor.byte_pos)
    }

    /// Cursor at the start of the record containing native time `time`.
    pub fn cursor_at_time(&self, time: u64) -> Result<Cursor> {
        if time >= self.header.total_duration {
            return Err(TimelineError::Exhausted {
                unit: "time",
                position: time,
                end: self.header.total_duration,
            });
        }
        let checkpoint = self.header.index.find_floor(time);
        let mut cursor = Cursor {
            byte_pos: checkpoint.byte_offset,
            time_pos: checkpoint.time,
        };
        loop {
            let header = self.peek(&cursor)?;
            if cursor.time_pos.saturating_add(header.duration) > time {
                return Ok(cursor);
            }
            cursor.advance(&header);
        }
    }

    /// Moves past the next record without reading its payload; returns its
    /// duration.
    pub fn skip_next(&self, cursor: &mut Cursor) -> Result<u64> {
        let header = self.peek(cursor)?;
        cursor.advance(&header);
        Ok(header.duration)
    }

    /// Reads the next record. `None` marks the end of data.
    pub fn read_next(&self, cursor: &mut Cursor) -> Result<Option<Datagram>> {
        if cursor.byte_pos == self.data_len() {
            return Ok(None);
        }
        let header = self.peek(cursor)?;
        let payload = self.source.read_bytes(
            cursor.byte_pos + RECORD_HEADER_SIZE as u64,
            header.payload_len as usize,
        )?;
        cursor.advance(&header);
        Ok(Some(Datagram::new(header.duration, payload)))
    }

    /// Record containing native time `time`.
    pub fn read_at(&self, time: u64) -> Result<Datagram> {
        let mut cursor = self.cursor_at_time(time)?;
        self.read_next(&mut cursor)?
            .ok_or(TimelineError::Exhausted {
                unit: "time",
                position: time,
                end: self.header.total_duration,
            })
    }

    /// Record containing `time`, given in samples at `sample_rate`.
    pub fn read_at_rate(&self, time: u64, sample_rate: u32) -> Result<Datagram> {
        self.read_at(self.rate.time_to_native(time, sample_rate)?)
    }

    /// Every record overlapping `[time, time + span)`, both given at
    /// `sample_rate`, plus the offset of `time` into the first record.
    pub fn read_range(&self, time: u64, span: u64, sample_rate: u32) -> Result<RangeRead> {
        let time = self.rate.time_to_native(time, sample_rate)?;
        let span = self.rate.to_native(span, sample_rate)?;

        let mut cursor = self.cursor_at_time(time)?;
        let leading_offset = time - cursor.time_pos;
        let mut records = Vec::new();
        if span == 0 {
            return Ok(RangeRead {
                records,
                leading_offset,
            });
        }

        let end = time.saturating_add(span);
        while cursor.time_pos < end {
            match self.read_next(&mut cursor)? {
                Some(record) => records.push(record),
                None => break,
            }
        }
        Ok(RangeRead {
            records,
            leading_offset,
        })
    }

    /// Up to `count` consecutive records starting with the one containing
    /// `time` (given at `sample_rate`).
    pub fn read_count(&self, time: u64, count: usize, sample_rate: u32) -> Result<RangeRead> {
        let time = self.rate.time_to_native(time, sample_rate)?;
        let mut cursor = self.cursor_at_time(time)?;
        let leading_offset = time - cursor.time_pos;
        let mut records = Vec::with_capacity(count.min(1024));
        while records.len() < count {
            match self.read_next(&mut cursor)? {
                Some(record) => records.push(record),
                None => break,
            }
        }
        Ok(RangeRead {
            records,
            leading_offset,
        })
    }

    /// Evaluates independent range queries across the rayon pool.
    #[cfg(feature = "parallel")]
    pub fn read_ranges(&self, queries: &[RangeQuery]) -> Vec<Result<RangeRead>> {
        use rayon::prelude::*;
        queries
            .par_iter()
            .map(|q| self.read_range(q.time, q.span, q.sample_rate))
            .collect()
    }

    /// Sequential iteration from the first record.
    pub fn iter(&self) -> Datagrams<'_> {
        self.iter_from(Cursor::start())
    }

    pub fn iter_from(&self, cursor: Cursor) -> Datagrams<'_> {
        Datagrams {
            reader: self,
            cursor,
            done: false,
        }
    }

    /// Sum of all record durations, in native samples.
    pub fn total_duration(&self) -> u64 {
        self.header.total_duration
    }

    pub fn total_duration_at(&self, sample_rate: u32) -> Result<u64> {
        self.rate.from_native(self.header.total_duration, sample_rate)
    }

    /// The creator's opaque metadata block.
    pub fn metadata(&self) -> &Bytes {
        &self.header.metadata
    }

    pub fn sample_rate(&self) -> u32 {
        self.header.sample_rate
    }

    pub fn num_datagrams(&self) -> u64 {
        self.header.num_datagrams
    }

    pub fn index(&self) -> &Index {
        &self.header.index
    }

    pub fn index_interval_secs(&self) -> f64 {
        self.header.index_interval_secs
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the record area is served from a memory mapping.
    pub fn is_mapped(&self) -> bool {
        self.source.name() == "mmap"
    }

    fn data_len(&self) -> u64 {
        self.header.data_len
    }

    pub fn info(&self) -> TimelineInfo {
        TimelineInfo {
            path: self.path.clone(),
            source: self.source.name(),
            sample_rate: self.header.sample_rate,
            num_datagrams: self.header.num_datagrams,
            total_duration: self.header.total_duration,
            total_seconds: self.header.total_duration as f64 / self.header.sample_rate as f64,
            index_interval_secs: self.header.index_interval_secs,
            index_len: self.header.index.len(),
            metadata_len: self.header.metadata.len(),
            data_start: self.data_start,
            data_len: self.header.data_len,
        }
    }

    /// Releases the file handle and any mappings.
    pub fn close(self) {
        debug!(path = %self.path.display(), source = self.source.name(), "Timeline closed");
        drop(self.source);
    }
}

/// Sequential iterator over records; stops after the end marker or the first
/// error.
pub struct Datagrams<'a> {
    reader: &'a TimelineReader,
    cursor: Cursor,
    done: bool,
}

impl Datagrams<'_> {
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }
}

impl Iterator for Datagrams<'_> {
    type Item = Result<Datagram>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_next(&mut self.cursor) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
