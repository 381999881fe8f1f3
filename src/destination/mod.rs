//! Write targets for the archive stream
//!
//! A destination is created with exclusive-create semantics: if the name is
//! already taken, creation fails with [`TransferError::AlreadyExists`] and the
//! existing file is left untouched. The returned sink is written monotonically
//! and closed exactly once.
//!
//! ## Available Destinations
//!
//! - **Local** - [`LocalFs`], backed by `O_EXCL` on the host filesystem
//! - **SFTP** - [`SftpClient`], a file opened over an authenticated SSH session
//!
//! ## Example Usage
//!
//! ```no_run
//! use arch_transfer::destination::{DestinationFactory, LocalFs};
//! use std::io::Write;
//!
//! let mut dest = LocalFs.create_exclusive("out.bin")?;
//! dest.write_all(b"payload")?;
//! dest.close()?;
//! # Ok::<(), arch_transfer::TransferError>(())
//! ```
//!
//! [`TransferError::AlreadyExists`]: crate::TransferError::AlreadyExists

pub mod local;
pub mod sftp;

pub use local::{LocalFile, LocalFs};
pub use sftp::{SftpClient, SftpFile};

use crate::error::Result;
use std::io::Write;

/// A writable sink that must be closed explicitly.
///
/// Closing reports errors that dropping would swallow (a failed commit to
/// disk, a failed remote close).
pub trait Destination: Write {
    /// Close the sink. Called exactly once, after the last write.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens destinations by name.
pub trait DestinationFactory {
    /// Create `path` and open it for writing; fail if it already exists.
    fn create_exclusive(&mut self, path: &str) -> Result<Box<dyn Destination>>;
}
