//! Positional-read sources over the record area.
//!
//! All higher-level logic (index lookup, scanning, range assembly) goes through
//! `PositionalRead`, so the streamed and mapped backends behave identically.

use bytes::Bytes;
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io;
use std::sync::Arc;

/// Default size of one mapped window of the record area (1 GiB).
pub const DEFAULT_MAP_WINDOW: u64 = 1 << 30;

/// Read `N` bytes at offset `O` of the record area. Offsets are relative to
/// the start of the record area, never to the start of the file.
pub trait PositionalRead: Send + Sync {
    /// Length of the record area in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `buf` from `offset`; fails with `UnexpectedEof` past the end.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Reads `len` bytes into an owned buffer. Backends that can hand out
    /// shared views of their storage override this.
    fn read_bytes(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn name(&self) -> &'static str;
}

fn check_bounds(offset: u64, len: usize, total: u64) -> io::Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= total => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "read of {} bytes at offset {} runs past the record area ({} bytes)",
                len, offset, total
            ),
        )),
    }
}

/// Streamed backend: `pread`-style reads against the open file, no shared
/// seek position.
pub struct FileSource {
    file: File,
    base: u64,
    len: u64,
}

impl FileSource {
    pub fn new(file: File, base: u64, len: u64) -> Self {
        Self { file, base, len }
    }
}

impl PositionalRead for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_bounds(offset, buf.len(), self.len)?;
        pread_exact(&self.file, buf, self.base + offset)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(unix)]
fn pread_exact(file: &File, buf: &mut [u8], pos: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, pos)
}

#[cfg(windows)]
fn pread_exact(file: &File, mut buf: &mut [u8], mut pos: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, pos) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                pos += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Mapped backend: the record area is mapped as consecutive read-only windows
/// of `window` bytes. Reads that fit in one window are served as shared views
/// of the mapping; reads that straddle windows are copied piecewise.
pub struct MappedSource {
    windows: Vec<Arc<Mmap>>,
    window: u64,
    len: u64,
}

impl MappedSource {
    pub fn new(file: &File, base: u64, len: u64, window: u64) -> io::Result<Self> {
        if window == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "map window size must be positive",
            ));
        }
        let count = len.div_ceil(window);
        let mut windows = Vec::with_capacity(count as usize);
        for i in 0..count {
            let start = i * window;
            let size = window.min(len - start);
            // SAFETY: the file is opened read-only and timelines are immutable
            // once closed; the mapping is never written through.
            let map = unsafe {
                MmapOptions::new()
                    .offset(base + start)
                    .len(size as usize)
                    .map(file)?
            };
            windows.push(Arc::new(map));
        }
        Ok(Self {
            windows,
            window,
            len,
        })
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    fn locate(&self, offset: u64) -> (usize, usize) {
        ((offset / self.window) as usize, (offset % self.window) as usize)
    }
}

impl PositionalRead for MappedSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        check_bounds(offset, buf.len(), self.len)?;
        let mut pos = offset;
        let mut out = buf;
        while !out.is_empty() {
            let (w, within) = self.locate(pos);
            let window = &self.windows[w];
            let n = out.len().min(window.len() - within);
            out[..n].copy_from_slice(&window[within..within + n]);
            out = &mut out[n..];
            pos += n as u64;
        }
        Ok(())
    }

    fn read_bytes(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        check_bounds(offset, len, self.len)?;
        if len == 0 {
            return Ok(Bytes::new());
        }
        let (w, within) = self.locate(offset);
        let window = &self.windows[w];
        if within + len <= window.len() {
            return Ok(Bytes::from_owner(MapSlice {
                map: Arc::clone(window),
                start: within,
                end: within + len,
            }));
        }
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn name(&self) -> &'static str {
        "mmap"
    }
}

/// Keeps a window alive for as long as a payload borrowed from it.
struct MapSlice {
    map: Arc<Mmap>,
    start: usize,
    end: usize,
}

impl AsRef<[u8]> for MapSlice {
    fn as_ref(&self) -> &[u8] {
        &self.map[self.start..self.end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(prefix: usize, data: &[u8]) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0xEE; prefix]).unwrap();
        tmp.write_all(data).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn file_and_mapped_sources_agree() {
        let data = pattern(10_000);
        let tmp = file_with(37, &data);
        let file = File::open(tmp.path()).unwrap();

        let streamed = FileSource::new(file.try_clone().unwrap(), 37, data.len() as u64);
        let mapped = MappedSource::new(&file, 37, data.len() as u64, 4096).unwrap();
        assert_eq!(mapped.window_count(), 3);

        for &(offset, len) in &[(0, 12), (4090, 12), (4096, 1), (100, 9000), (9999, 1)] {
            let mut a = vec![0u8; len];
            let mut b = vec![0u8; len];
            streamed.read_exact_at(offset, &mut a).unwrap();
            mapped.read_exact_at(offset, &mut b).unwrap();
            assert_eq!(a, b);
            assert_eq!(&a[..], &data[offset as usize..offset as usize + len]);

            let owned = mapped.read_bytes(offset, len).unwrap();
            assert_eq!(&owned[..], &a[..]);
        }
    }

    #[test]
    fn reads_past_end_fail() {
        let data = pattern(100);
        let tmp = file_with(0, &data);
        let file = File::open(tmp.path()).unwrap();
        let streamed = FileSource::new(file.try_clone().unwrap(), 0, 100);
        let mapped = MappedSource::new(&file, 0, 100, 64).unwrap();

        let mut buf = [0u8; 8];
        let sources: [&dyn PositionalRead; 2] = [&streamed, &mapped];
        for source in sources {
            let err = source.read_exact_at(96, &mut buf).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
            assert!(source.read_bytes(u64::MAX, 1).is_err());
        }
    }

    #[test]
    fn empty_area_maps_no_windows() {
        let tmp = file_with(16, &[]);
        let file = File::open(tmp.path()).unwrap();
        let mapped = MappedSource::new(&file, 16, 0, 4096).unwrap();
        assert_eq!(mapped.window_count(), 0);
        assert!(mapped.is_empty());
        assert!(mapped.read_bytes(0, 0).unwrap().is_empty());
    }

    #[test]
    fn zero_window_is_rejected() {
        let tmp = file_with(0, &pattern(10));
        let file = File::open(tmp.path()).unwrap();
        assert!(MappedSource::new(&file, 0, 10, 0).is_err());
    }
}
