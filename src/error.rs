//! Error types for arch-transfer

use std::io;
use std::path::PathBuf;

/// Result type for arch-transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Error types that can occur while archiving and transferring
#[derive(Debug)]
pub enum TransferError {
    /// Bad or missing input, unsupported archive type
    Config(String),
    /// Source root is neither a directory nor a regular file
    InvalidSource(PathBuf),
    /// Destination name is already taken
    AlreadyExists(String),
    /// Dial, handshake, host key or authentication failure
    Connect { address: String, message: String },
    /// Error reported by the SSH/SFTP session
    Ssh(ssh2::Error),
    /// I/O error
    Io(io::Error),
    /// Traversal failed on a path below the source root
    Walk { path: PathBuf, source: io::Error },
    /// Reading or encoding an archive entry failed
    Entry { path: String, source: io::Error },
    /// Closing the destination failed after a successful write phase
    Close(io::Error),
    /// Cancellation was requested mid-operation
    Cancelled,
    /// Archive structure could not be encoded
    Encoding(String),
    /// Invalid ZIP format or structure
    InvalidFormat(String),
    /// Entry not found in ZIP archive
    EntryNotFound(String),
    /// Unsupported compression method
    UnsupportedCompression(u16),
    /// Decoded entry does not match its stored CRC-32
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },
}

impl TransferError {
    /// True when the error is the result of a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            TransferError::InvalidSource(path) => write!(
                f,
                "Path is not a directory or regular file: {}",
                path.display()
            ),
            TransferError::AlreadyExists(path) => {
                write!(f, "Destination already exists: {}", path)
            }
            TransferError::Connect { address, message } => {
                write!(f, "Failed to connect to {}: {}", address, message)
            }
            TransferError::Ssh(e) => write!(f, "SSH error: {}", e),
            TransferError::Io(e) => write!(f, "I/O error: {}", e),
            TransferError::Walk { path, source } => {
                write!(f, "Failed to walk path {}: {}", path.display(), source)
            }
            TransferError::Entry { path, source } => {
                write!(f, "Failed to add {} to archive: {}", path, source)
            }
            TransferError::Close(e) => write!(f, "Failed to close destination file: {}", e),
            TransferError::Cancelled => write!(f, "Operation cancelled"),
            TransferError::Encoding(msg) => write!(f, "Archive encoding error: {}", msg),
            TransferError::InvalidFormat(msg) => write!(f, "Invalid ZIP format: {}", msg),
            TransferError::EntryNotFound(name) => write!(f, "Entry not found: {}", name),
            TransferError::UnsupportedCompression(method) => {
                write!(f, "Unsupported compression method: {}", method)
            }
            TransferError::ChecksumMismatch {
                name,
                expected,
                actual,
            } => write!(
                f,
                "CRC-32 mismatch for {}: expected {:08x}, got {:08x}",
                name, expected, actual
            ),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Ssh(e) => Some(e),
            TransferError::Io(e) | TransferError::Close(e) => Some(e),
            TransferError::Walk { source, .. } | TransferError::Entry { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(err: io::Error) -> Self {
        TransferError::Io(err)
    }
}

impl From<ssh2::Error> for TransferError {
    fn from(err: ssh2::Error) -> Self {
        TransferError::Ssh(err)
    }
}
