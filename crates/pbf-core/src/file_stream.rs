use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::capability::CacheBucketSource;
use crate::error::{Error, Result};
use crate::memory_buffer::MemoryBuffer;

/// Opens a file and serves random, positioned reads into caller-supplied
/// buffers.
///
/// Unlike the host workspace's `rawdb::Database`, this does not memory-map
/// the file: §1 asks for "random read a byte range into a caller-supplied
/// buffer" (pread-style), which `read_at` expresses directly without
/// committing the whole file's address space up front — the right choice
/// for files that run from hundreds of megabytes to tens of gigabytes.
#[derive(Debug, Default)]
pub struct FileStream {
    path: Option<PathBuf>,
    file: Option<File>,
}

impl FileStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if self.file.is_some() {
            return Err(Error::AlreadyOpen);
        }
        let path = path.as_ref();
        let file = File::open(path)?;
        debug!("file_stream: opened {}", path.display());
        self.path = Some(path.to_path_buf());
        self.file = Some(file);
        Ok(())
    }

    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("file_stream: closed {:?}", self.path);
        }
        self.path = None;
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_good(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl CacheBucketSource for FileStream {
    fn size(&self) -> Result<u64> {
        let file = self.file.as_ref().ok_or(Error::NotOpen)?;
        Ok(file.metadata()?.len())
    }

    fn copy_to(&self, dst: &mut MemoryBuffer, offset: u64, len: u64) -> Result<()> {
        let file = self.file.as_ref().ok_or(Error::NotOpen)?;
        let len = len as usize;
        let Some(buf) = dst.as_mut_slice() else {
            return Err(Error::BufferReleased);
        };
        if buf.len() != len {
            return Err(Error::CopyLengthMismatch { expected: len, actual: buf.len() });
        }
        file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn open_close_roundtrip() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"hello world")?;
        let mut stream = FileStream::new();
        assert!(!stream.is_open());
        stream.open(file.path())?;
        assert!(stream.is_open());
        assert_eq!(stream.size()?, 11);
        stream.close();
        assert!(!stream.is_open());
        Ok(())
    }

    #[test]
    fn double_open_fails() -> Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        let mut stream = FileStream::new();
        stream.open(file.path())?;
        assert!(matches!(stream.open(file.path()), Err(Error::AlreadyOpen)));
        Ok(())
    }

    #[test]
    fn copy_to_reads_the_requested_range() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"0123456789")?;
        let mut stream = FileStream::new();
        stream.open(file.path())?;

        let mut buf = MemoryBuffer::new(4)?;
        stream.copy_to(&mut buf, 3, 4)?;
        assert_eq!(buf.data(), Some(&b"3456"[..]));
        Ok(())
    }
}
