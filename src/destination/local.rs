//! Local filesystem destination

use super::{Destination, DestinationFactory};
use crate::error::{Result, TransferError};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Creates destination files on the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

/// An exclusively created local file
pub struct LocalFile {
    file: File,
}

impl LocalFs {
    /// Open `path` with `O_CREAT | O_EXCL`, mode 0644 on Unix
    pub fn create_file(&self, path: &Path) -> Result<LocalFile> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }

        let file = options.open(path).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => {
                TransferError::AlreadyExists(path.display().to_string())
            }
            _ => TransferError::Io(io::Error::new(
                e.kind(),
                format!("failed to create destination file {}: {}", path.display(), e),
            )),
        })?;
        tracing::debug!(path = %path.display(), "created local destination");
        Ok(LocalFile { file })
    }
}

impl DestinationFactory for LocalFs {
    fn create_exclusive(&mut self, path: &str) -> Result<Box<dyn Destination>> {
        Ok(Box::new(self.create_file(Path::new(path))?))
    }
}

impl Write for LocalFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Destination for LocalFile {
    fn close(self: Box<Self>) -> Result<()> {
        // Drop would discard a failed commit; sync so it surfaces here
        self.file.sync_all().map_err(TransferError::Close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn creates_and_closes() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out.zip");
        let mut dest = LocalFs.create_exclusive(path.to_str().unwrap())?;
        dest.write_all(b"abc")?;
        dest.close()?;
        assert_eq!(fs::read(&path)?, b"abc");
        Ok(())
    }

    #[test]
    fn refuses_existing_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out.zip");
        fs::write(&path, b"original")?;

        let err = match LocalFs.create_exclusive(path.to_str().unwrap()) {
            Ok(_) => panic!("existing destination was opened"),
            Err(e) => e,
        };
        assert!(matches!(err, TransferError::AlreadyExists(_)), "{}", err);
        assert_eq!(fs::read(&path)?, b"original");
        Ok(())
    }

    #[test]
    fn missing_parent_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no/such/dir/out.zip");
        match LocalFs.create_file(&path) {
            Err(TransferError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("file created under a missing directory"),
        }
    }
}
