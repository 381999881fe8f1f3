//! Source tree → ZIP stream → buffered destination
//!
//! [`transfer`] runs the whole pipeline for one destination:
//!
//! ```text
//! walk_path ──► StreamingZipWriter ──► CountingWriter ──► BufWriter ──► Destination
//! ```
//!
//! Everything runs on the calling thread, one entry at a time. The destination
//! is closed on every path once it has been created; when both the write phase
//! and the close fail, the write error is returned and the close error is
//! logged.

use crate::config::TransferOptions;
use crate::counter::CountingWriter;
use crate::destination::DestinationFactory;
use crate::error::{Result, TransferError};
use crate::walk::{settle, walk_path};
use crate::writer::StreamingZipWriter;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of a successful transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Archive bytes delivered to the destination
    pub bytes_written: u64,
    pub elapsed: Duration,
}

/// Archive `source` into a new file `destination` created by `factory`.
///
/// The destination is created exclusively before anything else happens; if
/// that fails nothing is read or written. On success the report carries the
/// exact number of archive bytes handed to the destination.
pub fn transfer<F>(
    source: &Path,
    factory: &mut F,
    destination: &str,
    options: &TransferOptions,
    cancel: &CancellationToken,
) -> Result<TransferReport>
where
    F: DestinationFactory + ?Sized,
{
    let start = Instant::now();
    options.validate()?;

    let dest = factory.create_exclusive(destination)?;
    tracing::debug!(
        source = %source.display(),
        destination,
        buffer_size = options.buffer_size,
        "starting transfer"
    );

    let mut buffered = BufWriter::with_capacity(options.buffer_size, dest);
    let mut counter = CountingWriter::new(&mut buffered);

    let mut result = encode_into(source, &mut counter, options, cancel);
    if result.is_ok() {
        result = counter.flush().map_err(TransferError::from);
    }
    // A destination that refuses writes after cancellation fails the flush
    let result = settle(result, cancel);
    let written = counter.count();

    // A failed write phase leaves the buffer as-is; it is not flushed on close
    let (dest, _) = buffered.into_parts();
    let closed = dest.close();

    match (result, closed) {
        (Ok(()), Ok(())) => {
            let report = TransferReport {
                bytes_written: written,
                elapsed: start.elapsed(),
            };
            tracing::debug!(bytes = report.bytes_written, "transfer complete");
            Ok(report)
        }
        (Ok(()), Err(close_err)) => Err(close_err),
        (Err(err), closed) => {
            if let Err(close_err) = closed {
                tracing::warn!(error = %close_err, "failed to close destination after error");
            }
            tracing::debug!(partial_bytes = written, error = %err, "transfer failed");
            Err(err)
        }
    }
}

/// Archive `source` into `sink` and return the number of bytes written.
///
/// The sink is neither buffered nor flushed; wrap it in a `BufWriter` when it
/// is expensive to write to.
pub fn write_archive<W: Write>(
    source: &Path,
    sink: W,
    options: &TransferOptions,
    cancel: &CancellationToken,
) -> Result<u64> {
    options.validate()?;
    let mut counter = CountingWriter::new(sink);
    encode_into(source, &mut counter, options, cancel)?;
    Ok(counter.count())
}

fn encode_into<W: Write>(
    source: &Path,
    counter: &mut CountingWriter<W>,
    options: &TransferOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut zip = StreamingZipWriter::from_writer_with_method(
        counter,
        options.compression_method,
        options.compression_level,
    );
    walk_path(source, cancel, |entry| {
        zip.add(&entry.path, &entry.metadata, entry.content)
    })?;
    tracing::debug!(entries = zip.entry_count(), "writing central directory");
    zip.finish()?;
    Ok(())
}
