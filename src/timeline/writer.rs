//! Append-only timeline writer.
//!
//! Record bytes are spooled to a temporary file beside the destination while
//! the index grows; `close` writes header and index, copies the record area
//! after them and renames the result into place. Nothing appears at the
//! destination until every byte is on disk.

use crate::timeline::config::WriterOptions;
use crate::timeline::index::{interval_samples, IndexBuilder};
use crate::timeline::layout::TimelineHeader;
use crate::timeline::rate::rescale;
use crate::timeline::record::{Datagram, RECORD_HEADER_SIZE};
use crate::timeline::{Result, TimelineError};
use bytes::Bytes;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// What `close` produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriterSummary {
    pub path: PathBuf,
    pub num_datagrams: u64,
    pub total_duration: u64,
    pub index_len: usize,
    pub data_len: u64,
    pub file_len: u64,
}

pub struct TimelineWriter {
    path: PathBuf,
    metadata: Bytes,
    sample_rate: u32,
    index_interval_secs: f64,
    spool: Option<BufWriter<NamedTempFile>>,
    index: IndexBuilder,
    num_datagrams: u64,
    total_duration: u64,
    data_len: u64,
    poisoned: bool,
}

impl TimelineWriter {
    /// Starts a new timeline at `path`.
    pub fn create(
        path: impl AsRef<Path>,
        metadata: impl Into<Bytes>,
        sample_rate: u32,
        index_interval_secs: f64,
    ) -> Result<Self> {
        let options = WriterOptions::new(sample_rate, index_interval_secs)?;
        Self::create_with_options(path, metadata, &options)
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn create_with_options(
        path: impl AsRef<Path>,
        metadata: impl Into<Bytes>,
        options: &WriterOptions,
    ) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let interval = interval_samples(options.index_interval_secs, options.sample_rate)?;
        let spool = NamedTempFile::new_in(spool_dir(&path))?;

        info!(
            sample_rate = options.sample_rate,
            index_interval = interval,
            "Timeline writer created"
        );

        Ok(Self {
            path,
            metadata: metadata.into(),
            sample_rate: options.sample_rate,
            index_interval_secs: options.index_interval_secs,
            spool: Some(BufWriter::new(spool)),
            index: IndexBuilder::new(interval),
            num_datagrams: 0,
            total_duration: 0,
            data_len: 0,
            poisoned: false,
        })
    }

    /// Appends `records` in order. Durations are given at `sample_rate` and
    /// stored at the native rate.
    pub fn feed(&mut self, records: &[Datagram], sample_rate: u32) -> Result<()> {
        for record in records {
            self.feed_one(record, sample_rate)?;
        }
        Ok(())
    }

    pub fn feed_one(&mut self, record: &Datagram, sample_rate: u32) -> Result<()> {
        if self.poisoned {
            return Err(TimelineError::invalid_argument(
                "writer aborted after an earlier I/O failure",
            ));
        }
        if sample_rate == 0 {
            return Err(TimelineError::invalid_argument(
                "records fed at a zero sample rate",
            ));
        }

        let duration = rescale(record.duration(), sample_rate, self.sample_rate)?;
        let header = record.clone().with_duration(duration).header()?;
        let total_duration = self.total_duration.checked_add(duration).ok_or_else(|| {
            TimelineError::invalid_argument("total duration overflows 64 bits")
        })?;

        let mut raw = [0u8; RECORD_HEADER_SIZE];
        header.encode(&mut &mut raw[..]);
        if let Err(e) = self.write_record(&raw, record.payload()) {
            self.poisoned = true;
            return Err(e.into());
        }

        self.num_datagrams += 1;
        self.total_duration = total_duration;
        self.data_len += header.record_len();
        self.index.feed(self.total_duration, self.data_len);
        Ok(())
    }

    fn write_record(&mut self, header: &[u8], payload: &[u8]) -> io::Result<()> {
        let spool = self
            .spool
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "writer already closed"))?;
        spool.write_all(header)?;
        spool.write_all(payload)
    }

    pub fn num_datagrams(&self) -> u64 {
        self.num_datagrams
    }

    /// Sum of the durations fed so far, in native samples.
    pub fn total_duration(&self) -> u64 {
        self.total_duration
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finalizes the file and makes it read-only.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn close(mut self) -> Result<WriterSummary> {
        let start = Instant::now();
        if self.poisoned {
            self.spool = None;
            return Err(TimelineError::invalid_argument(
                "writer aborted after an earlier I/O failure",
            ));
        }
        let spool = self
            .spool
            .take()
            .ok_or_else(|| TimelineError::invalid_argument("writer already closed"))?;
        let mut spool = spool.into_inner().map_err(|e| e.into_error())?;
        spool.seek(SeekFrom::Start(0))?;

        let index = std::mem::replace(&mut self.index, IndexBuilder::new(1)).finish();
        let index_len = index.len();
        let header = TimelineHeader {
            metadata: self.metadata.clone(),
            sample_rate: self.sample_rate,
            num_datagrams: self.num_datagrams,
            total_duration: self.total_duration,
            index_interval_secs: self.index_interval_secs,
            index,
            data_len: self.data_len,
        }
        .encode()?;

        let mut out = NamedTempFile::new_in(spool_dir(&self.path))?;
        {
            let mut writer = BufWriter::new(out.as_file_mut());
            writer.write_all(&header)?;
            let copied = io::copy(&mut spool, &mut writer)?;
            if copied != self.data_len {
                return Err(TimelineError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "record spool holds {} bytes, expected {}",
                        copied, self.data_len
                    ),
                )));
            }
            writer.flush()?;
        }
        out.as_file().sync_all()?;

        let file = out.persist(&self.path).map_err(|e| e.error)?;
        make_read_only(&file)?;
        let file_len = file.metadata()?.len();

        debug!(header_len = header.len(), "Header and index written");
        info!(
            num_datagrams = self.num_datagrams,
            total_duration = self.total_duration,
            index_len,
            file_len,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Timeline closed"
        );

        Ok(WriterSummary {
            path: self.path.clone(),
            num_datagrams: self.num_datagrams,
            total_duration: self.total_duration,
            index_len,
            data_len: self.data_len,
            file_len,
        })
    }
}

impl Drop for TimelineWriter {
    fn drop(&mut self) {
        if self.spool.is_some() {
            warn!(
                path = %self.path.display(),
                num_datagrams = self.num_datagrams,
                "Timeline writer dropped without close; discarding records"
            );
        }
    }
}

fn spool_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn make_read_only(file: &File) -> io::Result<()> {
    let mut permissions = file.metadata()?.permissions();
    permissions.set_readonly(true);
    file.set_permissions(permissions)
}
