#![forbid(unsafe_code)]

use std::{fs::File, io, path::Path, sync::Arc};

use crate::types::{Result, SombraError};

/// Positioned, read-only access to a store file.
///
/// The checker never writes through this trait; store files are opened
/// read-only so that a check cannot mutate the evidence it inspects.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes starting at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(unix)]
/// Unix-specific positioned reads using `pread`.
pub mod stdio_unix {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::unix::fs::FileExt,
    };

    /// Reads exact number of bytes at offset using Unix pread semantics.
    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }
}

#[cfg(windows)]
/// Windows-specific positioned reads using `seek_read`.
pub mod stdio_win {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::windows::fs::FileExt,
    };

    /// Reads exact number of bytes at offset using Windows seek_read semantics.
    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }
}

/// Read-only file handle shared between page cache readers.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an existing file handle.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens an existing file for reading.
    ///
    /// A missing file is reported as [`SombraError::MissingFile`] so callers can
    /// tell "store absent" apart from other I/O failures.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match File::open(path) {
            Ok(file) => Ok(Self::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(SombraError::MissingFile(path.to_path_buf()))
            }
            Err(err) => Err(SombraError::from(err)),
        }
    }

    fn file(&self) -> &File {
        &self.inner
    }

    #[cfg(unix)]
    fn read_exact(&self, off: u64, dst: &mut [u8]) -> io::Result<()> {
        stdio_unix::read_exact(self.file(), off, dst)
    }

    #[cfg(windows)]
    fn read_exact(&self, off: u64, dst: &mut [u8]) -> io::Result<()> {
        stdio_win::read_exact(self.file(), off, dst)
    }

    #[cfg(not(any(unix, windows)))]
    fn read_exact(&self, _off: u64, _dst: &mut [u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.read_exact(off, dst).map_err(SombraError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata().map_err(SombraError::from)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn reads_back_written_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        std::fs::write(&path, b"hello mundo").unwrap();
        let io = StdFileIo::open_read_only(&path).unwrap();

        let mut buf = vec![0u8; 5];
        io.read_at(6, &mut buf).unwrap();
        assert_eq!(&buf, b"mundo");
        assert_eq!(io.len().unwrap(), 11);
    }

    #[test]
    fn read_past_eof_returns_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        std::fs::write(&path, b"abc").unwrap();
        let io = StdFileIo::open_read_only(&path).unwrap();

        let mut buf = vec![0u8; 8];
        let err = io.read_at(0, &mut buf).unwrap_err();
        match err {
            SombraError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_distinguished() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        let err = StdFileIo::open_read_only(&path).err().unwrap();
        assert!(matches!(err, SombraError::MissingFile(p) if p == path));
    }
}
