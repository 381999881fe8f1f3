//! # arch-transfer: stream a directory tree as a ZIP archive to a local or SFTP destination
//!
//! `arch-transfer` archives a single file or a directory tree and writes the
//! archive straight to its destination. Nothing is staged: the filesystem walk,
//! the ZIP encoder and the destination writes run as one sequential stream, so
//! memory use stays constant regardless of how much data is moved.
//!
//! ## Features
//!
//! - **Streaming ZIP**: data descriptors and ZIP64, no seeking on the output
//! - **Exclusive create**: an existing destination is never overwritten
//! - **Local or SFTP**: both destinations implement the same [`Destination`] trait
//! - **Cancellable**: a [`CancellationToken`] is observed between entries and
//!   during file reads
//!
//! ## Quick Start
//!
//! ### Archiving to a local file
//!
//! ```no_run
//! use arch_transfer::{transfer, CancellationToken, LocalFs, TransferOptions};
//! use std::path::Path;
//!
//! let report = transfer(
//!     Path::new("photos"),
//!     &mut LocalFs,
//!     "photos.zip",
//!     &TransferOptions::default(),
//!     &CancellationToken::new(),
//! )?;
//! println!("{} bytes in {:?}", report.bytes_written, report.elapsed);
//! # Ok::<(), arch_transfer::TransferError>(())
//! ```
//!
//! ### Archiving to an SFTP server
//!
//! ```no_run
//! use arch_transfer::{transfer, CancellationToken, HostKeyPolicy, RemoteConfig, SftpClient, TransferOptions};
//! use std::path::Path;
//!
//! let config = RemoteConfig::new(
//!     "backup.example.com",
//!     "alice",
//!     "hunter2",
//!     HostKeyPolicy::default_known_hosts()?,
//! );
//! let mut client = SftpClient::connect(&config)?;
//! let report = transfer(
//!     Path::new("photos"),
//!     &mut client,
//!     "/srv/backups/photos.zip",
//!     &TransferOptions::default(),
//!     &CancellationToken::new(),
//! );
//! client.close()?;
//! report?;
//! # Ok::<(), arch_transfer::TransferError>(())
//! ```
//!
//! ### Writing to any `Write`
//!
//! ```no_run
//! use arch_transfer::{write_archive, CancellationToken, TransferOptions};
//! use std::path::Path;
//!
//! let mut buffer = Vec::new();
//! let n = write_archive(
//!     Path::new("notes"),
//!     &mut buffer,
//!     &TransferOptions::default(),
//!     &CancellationToken::new(),
//! )?;
//! assert_eq!(n, buffer.len() as u64);
//! # Ok::<(), arch_transfer::TransferError>(())
//! ```
//!
//! ## Limitations
//!
//! Only directories and regular files are archived. Symlinks, devices,
//! sockets and FIFOs below the source root are skipped without notice.

pub mod config;
pub mod counter;
pub mod destination;
pub mod error;
pub mod reader;
pub mod transfer;
pub mod walk;
pub mod writer;

pub use config::{ArchiveType, HostKeyPolicy, RemoteConfig, TransferOptions};
pub use counter::CountingWriter;
pub use destination::{Destination, DestinationFactory, LocalFs, SftpClient};
pub use error::{Result, TransferError};
pub use reader::{StreamingZipReader, ZipEntry};
pub use transfer::{transfer, write_archive, TransferReport};
pub use walk::{walk_path, Entry, EntryMetadata};
pub use writer::{CompressionMethod, StreamingZipWriter};

pub use tokio_util::sync::CancellationToken;
