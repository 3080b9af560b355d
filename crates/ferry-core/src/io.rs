//! Local ends of a transfer: where outgoing bytes come from and where
//! incoming bytes go.
//!
//! Both traits are positional. The flow controller only ever asks for the
//! range the friend requested, so a source never needs to hold more than one
//! chunk in memory.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Data of an outgoing transfer
pub trait DataSource {
    /// Fill `buf` with the bytes starting at `offset`
    ///
    /// Must fill the whole buffer; a short source is an error.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

/// Destination of an incoming transfer
pub trait DataSink {
    /// Write `data` starting at `offset`
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Called once after the last byte was written
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory source
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    /// Serve `data`
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    /// Number of bytes available
    #[must_use]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the source is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl DataSource for MemorySource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "read past end"))?;
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }
}

/// In-memory sink
///
/// Clones share the same buffer, so a caller can keep one clone to inspect
/// the received bytes after handing the other to a transfer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl DataSink for MemorySink {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        let end = start + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// File-backed source
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    /// Open `path` for reading
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or inspected.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    /// File size at open time
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file was empty at open time
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl DataSource for FileSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }
}

/// File-backed sink
pub struct FileSink {
    file: File,
}

impl FileSink {
    /// Create (or truncate) `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: File::create(path)?,
        })
    }

    /// Open `path` keeping its contents, for resuming a partial download
    ///
    /// Returns the sink and the current file length, which is the offset to
    /// seek the transfer to.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open_resume(path: impl AsRef<Path>) -> io::Result<(Self, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok((Self { file }, len))
    }
}

impl DataSink for FileSink {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_source_reads_range() {
        let mut source = MemorySource::new(b"0123456789".to_vec());
        let mut buf = [0u8; 4];
        source.read_at(3, &mut buf).unwrap();
        assert_eq!(&buf, b"3456");
        assert_eq!(source.len(), 10);
    }

    #[test]
    fn test_memory_source_short_read_fails() {
        let mut source = MemorySource::new(b"0123".to_vec());
        let mut buf = [0u8; 4];
        let err = source.read_at(2, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_memory_sink_shared_buffer() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write_at(0, b"Hello").unwrap();
        writer.write_at(5, b" World").unwrap();
        assert_eq!(sink.contents(), b"Hello World");
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let src_path = dir.path().join("src.bin");
        let dst_path = dir.path().join("dst.bin");
        std::fs::write(&src_path, b"The quick brown fox").unwrap();

        let mut source = FileSource::open(&src_path).unwrap();
        assert_eq!(source.len(), 19);
        let mut sink = FileSink::create(&dst_path).unwrap();

        let mut offset = 0u64;
        while offset < source.len() {
            let len = (source.len() - offset).min(4) as usize;
            let mut buf = vec![0u8; len];
            source.read_at(offset, &mut buf).unwrap();
            sink.write_at(offset, &buf).unwrap();
            offset += len as u64;
        }
        sink.finish().unwrap();

        assert_eq!(std::fs::read(&dst_path).unwrap(), b"The quick brown fox");
    }

    #[test]
    fn test_file_sink_resume_keeps_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.bin");
        std::fs::write(&path, b"Hello").unwrap();

        let (mut sink, len) = FileSink::open_resume(&path).unwrap();
        assert_eq!(len, 5);
        sink.write_at(len, b" World").unwrap();
        sink.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"Hello World");
    }
}
