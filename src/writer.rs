//! Streaming ZIP writer that compresses entries on-the-fly into any `Write`
//!
//! The writer never seeks: every file record is written as a local header with
//! zeroed sizes, the (compressed) body, and a trailing data descriptor carrying
//! the CRC-32 and sizes. Offsets for the central directory are tracked by
//! counting the bytes handed to the underlying writer, so the output can be a
//! pipe, a socket or a remote file handle.
//!
//! Entries are appended with [`StreamingZipWriter::add`] in the order they are
//! given; [`StreamingZipWriter::finish`] writes the central directory in the
//! same order and consumes the writer.

use crate::counter::CountingWriter;
use crate::error::{Result, TransferError};
use crate::walk::EntryMetadata;
use chrono::{DateTime, Datelike, Local, NaiveDateTime, Timelike};
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

const LOCAL_FILE_HEADER_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const DATA_DESCRIPTOR_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x07, 0x08];
const CENTRAL_DIRECTORY_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x06];
const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x06, 0x07];
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];

const VERSION_NEEDED_DEFAULT: u16 = 20;
const VERSION_NEEDED_ZIP64: u16 = 45;
/// Upper byte 3 = Unix, so readers honor the mode in the external attributes
const VERSION_MADE_BY: u16 = (3 << 8) | 20;

const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
const FLAG_UTF8: u16 = 0x0800;

const EXTRA_ZIP64: u16 = 0x0001;
const EXTRA_EXTENDED_TIMESTAMP: u16 = 0x5455;

const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const MSDOS_READONLY: u32 = 0x01;
const MSDOS_DIR: u32 = 0x10;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Default DEFLATE level, same as zlib's default
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Compression method to use for ZIP entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression (stored)
    Stored,
    /// DEFLATE compression (most common)
    Deflate,
    /// Zstd compression (requires zstd-support feature)
    #[cfg(feature = "zstd-support")]
    Zstd,
}

impl CompressionMethod {
    pub(crate) fn to_zip_method(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            #[cfg(feature = "zstd-support")]
            CompressionMethod::Zstd => 93,
        }
    }
}

impl FromStr for CompressionMethod {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stored" | "store" => Ok(CompressionMethod::Stored),
            "deflate" => Ok(CompressionMethod::Deflate),
            #[cfg(feature = "zstd-support")]
            "zstd" => Ok(CompressionMethod::Zstd),
            other => Err(TransferError::Config(format!(
                "unsupported compression method: {}",
                other
            ))),
        }
    }
}

/// Entry already written, kept for the central directory
struct ZipEntry {
    name: String,
    flags: u16,
    compression_method: u16,
    dos_time: u16,
    dos_date: u16,
    unix_mtime: u32,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    external_attributes: u32,
}

impl ZipEntry {
    fn needs_zip64(&self) -> bool {
        self.uncompressed_size > u32::MAX as u64
            || self.compressed_size > u32::MAX as u64
            || self.local_header_offset > u32::MAX as u64
    }
}

/// Streaming ZIP writer over an arbitrary, non-seekable writer
pub struct StreamingZipWriter<W: Write> {
    output: CountingWriter<W>,
    entries: Vec<ZipEntry>,
    compression_level: u32,
    compression_method: CompressionMethod,
}

trait CompressorWrite: Write {
    fn finish_compression(self: Box<Self>) -> io::Result<()>;
}

impl<W: Write> CompressorWrite for DeflateEncoder<W> {
    fn finish_compression(self: Box<Self>) -> io::Result<()> {
        self.finish().map(|_| ())
    }
}

#[cfg(feature = "zstd-support")]
impl<W: Write> CompressorWrite for zstd::Encoder<'static, W> {
    fn finish_compression(self: Box<Self>) -> io::Result<()> {
        self.finish().map(|_| ())
    }
}

/// Pass-through for stored entries
struct StoredCompressor<W: Write> {
    inner: W,
}

impl<W: Write> Write for StoredCompressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> CompressorWrite for StoredCompressor<W> {
    fn finish_compression(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> StreamingZipWriter<W> {
    /// Create a new ZIP writer with default compression level (6) using DEFLATE
    pub fn from_writer(writer: W) -> Self {
        Self::from_writer_with_compression(writer, DEFAULT_COMPRESSION_LEVEL)
    }

    /// Create a new ZIP writer with custom compression level (0-9) using DEFLATE
    pub fn from_writer_with_compression(writer: W, compression_level: u32) -> Self {
        Self::from_writer_with_method(writer, CompressionMethod::Deflate, compression_level)
    }

    /// Create a new ZIP writer with specified compression method and level
    ///
    /// # Arguments
    /// * `writer` - Any writer implementing Write
    /// * `method` - Compression method to use (Deflate, Zstd, or Stored)
    /// * `compression_level` - Compression level (0-9 for DEFLATE, 1-21 for Zstd)
    pub fn from_writer_with_method(
        writer: W,
        method: CompressionMethod,
        compression_level: u32,
    ) -> Self {
        Self {
            output: CountingWriter::new(writer),
            entries: Vec::new(),
            compression_level,
            compression_method: method,
        }
    }

    /// Number of entries added so far
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Bytes written to the underlying writer so far
    pub fn bytes_written(&self) -> u64 {
        self.output.count()
    }

    /// Append one entry to the archive.
    ///
    /// `path` becomes the entry name verbatim (a directory gets a trailing
    /// `/`); the metadata supplies timestamp, mode and the directory flag.
    /// Directory records are header-only and `content` is ignored. For files,
    /// `content` is read to the end and compressed into the record body.
    ///
    /// Any read or write failure is returned as [`TransferError::Entry`]
    /// naming the entry. The archive must not be used after a failed `add`.
    ///
    /// # Example
    /// ```no_run
    /// use arch_transfer::{EntryMetadata, StreamingZipWriter};
    /// use std::time::SystemTime;
    ///
    /// let mut zip = StreamingZipWriter::from_writer(Vec::new());
    /// let meta = EntryMetadata::file(5, SystemTime::now(), 0o644);
    /// zip.add("hello.txt", &meta, Some(&mut &b"hello"[..]))?;
    /// let bytes = zip.finish()?;
    /// # Ok::<(), arch_transfer::TransferError>(())
    /// ```
    pub fn add(
        &mut self,
        path: &str,
        metadata: &EntryMetadata,
        content: Option<&mut dyn Read>,
    ) -> Result<()> {
        let name = entry_name(path, metadata.is_dir)?;

        let entry = if metadata.is_dir {
            self.write_directory(name, metadata)
        } else {
            let content = content.ok_or_else(|| {
                TransferError::Encoding(format!("file entry {} has no content", name))
            })?;
            self.write_file(name.clone(), metadata, content)
                .map_err(|source| TransferError::Entry { path: name, source })
        }?;

        tracing::trace!(
            name = %entry.name,
            offset = entry.local_header_offset,
            size = entry.uncompressed_size,
            "added zip entry"
        );
        self.entries.push(entry);
        Ok(())
    }

    fn write_directory(&mut self, name: String, metadata: &EntryMetadata) -> Result<ZipEntry> {
        let mut entry = self.new_entry(name, metadata, 0);
        entry.flags &= !FLAG_DATA_DESCRIPTOR;
        self.write_local_header(&entry)
            .map_err(|source| TransferError::Entry {
                path: entry.name.clone(),
                source,
            })?;
        Ok(entry)
    }

    fn write_file(
        &mut self,
        name: String,
        metadata: &EntryMetadata,
        content: &mut dyn Read,
    ) -> io::Result<ZipEntry> {
        let method = self.compression_method.to_zip_method();
        let mut entry = self.new_entry(name, metadata, method);
        self.write_local_header(&entry)?;

        let (crc32, compressed_size, uncompressed_size) = self.write_body(content)?;
        entry.crc32 = crc32;
        entry.compressed_size = compressed_size;
        entry.uncompressed_size = uncompressed_size;

        // Data descriptor; 64-bit sizes when either exceeds 32 bits
        self.output.write_all(&DATA_DESCRIPTOR_SIGNATURE)?;
        self.output.write_all(&crc32.to_le_bytes())?;
        if compressed_size > u32::MAX as u64 || uncompressed_size > u32::MAX as u64 {
            self.output.write_all(&compressed_size.to_le_bytes())?;
            self.output.write_all(&uncompressed_size.to_le_bytes())?;
        } else {
            self.output
                .write_all(&(compressed_size as u32).to_le_bytes())?;
            self.output
                .write_all(&(uncompressed_size as u32).to_le_bytes())?;
        }

        Ok(entry)
    }

    fn new_entry(&self, name: String, metadata: &EntryMetadata, method: u16) -> ZipEntry {
        let (dos_time, dos_date) = dos_date_time(metadata.modified);
        let mut flags = FLAG_DATA_DESCRIPTOR;
        if !name.is_ascii() {
            flags |= FLAG_UTF8;
        }
        ZipEntry {
            name,
            flags,
            compression_method: method,
            dos_time,
            dos_date,
            unix_mtime: unix_seconds(metadata.modified),
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            local_header_offset: self.output.count(),
            external_attributes: external_attributes(metadata),
        }
    }

    fn write_local_header(&mut self, entry: &ZipEntry) -> io::Result<()> {
        self.output.write_all(&LOCAL_FILE_HEADER_SIGNATURE)?;
        self.output
            .write_all(&VERSION_NEEDED_DEFAULT.to_le_bytes())?; // version needed
        self.output.write_all(&entry.flags.to_le_bytes())?; // general purpose bit flag
        self.output
            .write_all(&entry.compression_method.to_le_bytes())?; // compression method
        self.output.write_all(&entry.dos_time.to_le_bytes())?;
        self.output.write_all(&entry.dos_date.to_le_bytes())?;
        self.output.write_all(&0u32.to_le_bytes())?; // crc32 (in data descriptor)
        self.output.write_all(&0u32.to_le_bytes())?; // compressed size
        self.output.write_all(&0u32.to_le_bytes())?; // uncompressed size
        self.output
            .write_all(&(entry.name.len() as u16).to_le_bytes())?;
        let extra = timestamp_extra(entry.unix_mtime);
        self.output.write_all(&(extra.len() as u16).to_le_bytes())?;
        self.output.write_all(entry.name.as_bytes())?;
        self.output.write_all(&extra)?;
        Ok(())
    }

    /// Copy `content` through the compressor; returns (crc, compressed, uncompressed)
    fn write_body(&mut self, content: &mut dyn Read) -> io::Result<(u32, u64, u64)> {
        let start = self.output.count();
        let mut crc = Crc32::new();
        let mut uncompressed = 0u64;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];

        let mut encoder: Box<dyn CompressorWrite + '_> = match self.compression_method {
            CompressionMethod::Stored => Box::new(StoredCompressor {
                inner: &mut self.output,
            }),
            CompressionMethod::Deflate => Box::new(DeflateEncoder::new(
                &mut self.output,
                Compression::new(self.compression_level),
            )),
            #[cfg(feature = "zstd-support")]
            CompressionMethod::Zstd => {
                let mut encoder =
                    zstd::Encoder::new(&mut self.output, self.compression_level as i32)?;
                encoder.include_checksum(false)?; // ZIP uses CRC32, not zstd checksum
                Box::new(encoder)
            }
        };

        loop {
            let n = match content.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            crc.update(&buf[..n]);
            uncompressed += n as u64;
            encoder.write_all(&buf[..n])?;
        }
        encoder.finish_compression()?;

        Ok((crc.finalize(), self.output.count() - start, uncompressed))
    }

    /// Finish the ZIP stream: write the central directory and end records,
    /// then return the writer. The writer is not flushed.
    ///
    /// A write failure here is reported as [`TransferError::Encoding`].
    pub fn finish(mut self) -> Result<W> {
        let entries = std::mem::take(&mut self.entries);
        let need_zip64 = self.write_central_directory(&entries).map_err(|e| {
            TransferError::Encoding(format!("failed to write central directory: {}", e))
        })?;

        tracing::debug!(
            entries = entries.len(),
            bytes = self.output.count(),
            zip64 = need_zip64,
            "finished zip archive"
        );
        Ok(self.output.into_inner())
    }

    /// Central directory plus end records; returns whether ZIP64 was needed
    fn write_central_directory(&mut self, entries: &[ZipEntry]) -> io::Result<bool> {
        let central_dir_offset = self.output.count();

        for entry in entries {
            self.write_central_record(entry)?;
        }

        let central_dir_size = self.output.count() - central_dir_offset;

        // Determine if we need ZIP64 EOCD
        let need_zip64 = entries.len() >= u16::MAX as usize
            || central_dir_size >= u32::MAX as u64
            || central_dir_offset >= u32::MAX as u64;

        if need_zip64 {
            let zip64_eocd_pos = self.output.count();

            self.output
                .write_all(&ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
            // size of the remaining record
            self.output.write_all(&44u64.to_le_bytes())?;
            self.output.write_all(&VERSION_MADE_BY.to_le_bytes())?;
            self.output.write_all(&VERSION_NEEDED_ZIP64.to_le_bytes())?;
            // disk number, disk where central dir starts
            self.output.write_all(&0u32.to_le_bytes())?;
            self.output.write_all(&0u32.to_le_bytes())?;
            // entries on this disk, total entries
            self.output
                .write_all(&(entries.len() as u64).to_le_bytes())?;
            self.output
                .write_all(&(entries.len() as u64).to_le_bytes())?;
            self.output.write_all(&central_dir_size.to_le_bytes())?;
            self.output.write_all(&central_dir_offset.to_le_bytes())?;

            self.output
                .write_all(&ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE)?;
            self.output.write_all(&0u32.to_le_bytes())?; // disk with ZIP64 EOCD
            self.output.write_all(&zip64_eocd_pos.to_le_bytes())?;
            self.output.write_all(&1u32.to_le_bytes())?; // total number of disks
        }

        self.output.write_all(&END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        self.output.write_all(&0u16.to_le_bytes())?; // disk number
        self.output.write_all(&0u16.to_le_bytes())?; // disk with central dir

        let count = if need_zip64 {
            0xFFFF
        } else {
            entries.len() as u16
        };
        self.output.write_all(&count.to_le_bytes())?; // entries on this disk
        self.output.write_all(&count.to_le_bytes())?; // total entries

        let (size, offset) = if need_zip64 {
            (0xFFFFFFFFu32, 0xFFFFFFFFu32)
        } else {
            (central_dir_size as u32, central_dir_offset as u32)
        };
        self.output.write_all(&size.to_le_bytes())?;
        self.output.write_all(&offset.to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?; // comment len

        Ok(need_zip64)
    }

    fn write_central_record(&mut self, entry: &ZipEntry) -> io::Result<()> {
        let zip64 = entry.needs_zip64();
        let version_needed = if zip64 {
            VERSION_NEEDED_ZIP64
        } else {
            VERSION_NEEDED_DEFAULT
        };

        // ZIP64 extra carries only the fields that overflow, in APPNOTE order
        let mut extra: Vec<u8> = Vec::new();
        if zip64 {
            let mut data: Vec<u8> = Vec::new();
            if entry.uncompressed_size > u32::MAX as u64 {
                data.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
            }
            if entry.compressed_size > u32::MAX as u64 {
                data.extend_from_slice(&entry.compressed_size.to_le_bytes());
            }
            if entry.local_header_offset > u32::MAX as u64 {
                data.extend_from_slice(&entry.local_header_offset.to_le_bytes());
            }
            extra.extend_from_slice(&EXTRA_ZIP64.to_le_bytes());
            extra.extend_from_slice(&(data.len() as u16).to_le_bytes());
            extra.extend_from_slice(&data);
        }
        extra.extend_from_slice(&timestamp_extra(entry.unix_mtime));

        self.output.write_all(&CENTRAL_DIRECTORY_SIGNATURE)?;
        self.output.write_all(&VERSION_MADE_BY.to_le_bytes())?;
        self.output.write_all(&version_needed.to_le_bytes())?;
        self.output.write_all(&entry.flags.to_le_bytes())?;
        self.output
            .write_all(&entry.compression_method.to_le_bytes())?;
        self.output.write_all(&entry.dos_time.to_le_bytes())?;
        self.output.write_all(&entry.dos_date.to_le_bytes())?;
        self.output.write_all(&entry.crc32.to_le_bytes())?;
        self.output
            .write_all(&clamp_u32(entry.compressed_size).to_le_bytes())?;
        self.output
            .write_all(&clamp_u32(entry.uncompressed_size).to_le_bytes())?;
        self.output
            .write_all(&(entry.name.len() as u16).to_le_bytes())?;
        self.output.write_all(&(extra.len() as u16).to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?; // file comment len
        self.output.write_all(&0u16.to_le_bytes())?; // disk number start
        self.output.write_all(&0u16.to_le_bytes())?; // internal attrs
        self.output
            .write_all(&entry.external_attributes.to_le_bytes())?;
        self.output
            .write_all(&clamp_u32(entry.local_header_offset).to_le_bytes())?;
        self.output.write_all(entry.name.as_bytes())?;
        self.output.write_all(&extra)?;
        Ok(())
    }
}

/// 32-bit field value, or the ZIP64 placeholder when it does not fit
fn clamp_u32(value: u64) -> u32 {
    if value > u32::MAX as u64 {
        0xFFFFFFFF
    } else {
        value as u32
    }
}

fn entry_name(path: &str, is_dir: bool) -> Result<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(TransferError::Encoding(format!(
            "invalid entry name: {:?}",
            path
        )));
    }
    let name = if is_dir {
        format!("{}/", trimmed)
    } else {
        trimmed.to_string()
    };
    if name.len() > u16::MAX as usize {
        return Err(TransferError::Encoding(format!(
            "entry name exceeds {} bytes",
            u16::MAX
        )));
    }
    Ok(name)
}

fn external_attributes(metadata: &EntryMetadata) -> u32 {
    let (kind, mut msdos) = if metadata.is_dir {
        (S_IFDIR, MSDOS_DIR)
    } else {
        (S_IFREG, 0)
    };
    if metadata.mode & 0o200 == 0 {
        msdos |= MSDOS_READONLY;
    }
    ((kind | metadata.mode) << 16) | msdos
}

/// Extended timestamp extra field (0x5455) with the modification time only
fn timestamp_extra(unix_mtime: u32) -> [u8; 9] {
    let mut extra = [0u8; 9];
    extra[0..2].copy_from_slice(&EXTRA_EXTENDED_TIMESTAMP.to_le_bytes());
    extra[2..4].copy_from_slice(&5u16.to_le_bytes());
    extra[4] = 1; // mtime present
    extra[5..9].copy_from_slice(&unix_mtime.to_le_bytes());
    extra
}

fn unix_seconds(time: SystemTime) -> u32 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

/// MS-DOS (time, date) in local time
fn dos_date_time(time: SystemTime) -> (u16, u16) {
    let local: DateTime<Local> = time.into();
    naive_to_dos(local.naive_local())
}

/// MS-DOS format covers 1980-01-01 through 2107-12-31 at 2 second resolution.
fn naive_to_dos(dt: NaiveDateTime) -> (u16, u16) {
    if dt.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    if dt.year() > 2107 {
        return ((23 << 11) | (59 << 5) | 29, (127 << 9) | (12 << 5) | 31);
    }
    let time = (dt.hour() << 11) | (dt.minute() << 5) | (dt.second() / 2);
    let date = (((dt.year() - 1980) as u32) << 9) | (dt.month() << 5) | dt.day();
    (time as u16, date as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn file_meta(size: u64) -> EntryMetadata {
        EntryMetadata::file(size, UNIX_EPOCH, 0o644)
    }

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }

    #[test]
    fn dos_time_encoding() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(13, 45, 31)
            .unwrap();
        let (time, date) = naive_to_dos(dt);
        assert_eq!(time, (13 << 11) | (45 << 5) | 15);
        assert_eq!(date, (44 << 9) | (3 << 5) | 15);
    }

    #[test]
    fn dos_time_clamps_before_1980() {
        let dt = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(naive_to_dos(dt), (0, (1 << 5) | 1));
    }

    #[test]
    fn external_attributes_carry_unix_mode() {
        let dir = EntryMetadata::directory(UNIX_EPOCH, 0o755);
        assert_eq!(external_attributes(&dir), ((S_IFDIR | 0o755) << 16) | MSDOS_DIR);

        let ro = EntryMetadata::file(0, UNIX_EPOCH, 0o444);
        assert_eq!(
            external_attributes(&ro),
            ((S_IFREG | 0o444) << 16) | MSDOS_READONLY
        );
    }

    #[test]
    fn entry_names_are_normalized() {
        assert_eq!(entry_name("a/b.txt", false).unwrap(), "a/b.txt");
        assert_eq!(entry_name("sub", true).unwrap(), "sub/");
        assert_eq!(entry_name("sub/", true).unwrap(), "sub/");
        assert!(entry_name("", false).is_err());
        assert!(entry_name(&"x".repeat(70_000), false).is_err());
    }

    #[test]
    fn directory_record_is_header_only() -> Result<()> {
        let mut zip = StreamingZipWriter::from_writer(Vec::new());
        let meta = EntryMetadata::directory(UNIX_EPOCH, 0o755);
        // content must not be touched for directories
        let mut never_read: &[u8] = b"ignored";
        zip.add("docs", &meta, Some(&mut never_read))?;
        assert_eq!(never_read, b"ignored");
        let header_len = zip.bytes_written();
        let bytes = zip.finish()?;

        assert_eq!(&bytes[0..4], &LOCAL_FILE_HEADER_SIGNATURE);
        assert_eq!(u16_at(&bytes, 6), 0); // no data descriptor
        assert_eq!(u16_at(&bytes, 8), 0); // stored
        assert_eq!(&bytes[30..35], b"docs/");
        assert_eq!(header_len, 30 + 5 + 9);
        // central directory follows immediately
        assert_eq!(&bytes[header_len as usize..header_len as usize + 4], &CENTRAL_DIRECTORY_SIGNATURE);
        Ok(())
    }

    #[test]
    fn file_record_uses_data_descriptor() -> Result<()> {
        let mut zip =
            StreamingZipWriter::from_writer_with_method(Vec::new(), CompressionMethod::Stored, 0);
        zip.add("a.txt", &file_meta(3), Some(&mut &b"xyz"[..]))?;
        let bytes = zip.finish()?;

        assert_eq!(u16_at(&bytes, 6), FLAG_DATA_DESCRIPTOR);
        assert_eq!(u16_at(&bytes, 8), 0);
        let body = 30 + 5 + 9;
        assert_eq!(&bytes[body..body + 3], b"xyz");
        let dd = body + 3;
        assert_eq!(&bytes[dd..dd + 4], &DATA_DESCRIPTOR_SIGNATURE);
        assert_eq!(u32_at(&bytes, dd + 4), crc32fast::hash(b"xyz"));
        assert_eq!(u32_at(&bytes, dd + 8), 3);
        assert_eq!(u32_at(&bytes, dd + 12), 3);
        Ok(())
    }

    #[test]
    fn end_record_counts_entries() -> Result<()> {
        let mut zip = StreamingZipWriter::from_writer(Vec::new());
        zip.add("one", &file_meta(1), Some(&mut &b"1"[..]))?;
        zip.add("two", &file_meta(1), Some(&mut &b"2"[..]))?;
        zip.add("dir", &EntryMetadata::directory(UNIX_EPOCH, 0o755), None)?;
        assert_eq!(zip.entry_count(), 3);
        let bytes = zip.finish()?;

        let eocd = bytes.len() - 22;
        assert_eq!(&bytes[eocd..eocd + 4], &END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        assert_eq!(u16_at(&bytes, eocd + 8), 3);
        assert_eq!(u16_at(&bytes, eocd + 10), 3);
        let cd_size = u32_at(&bytes, eocd + 12) as usize;
        let cd_offset = u32_at(&bytes, eocd + 16) as usize;
        assert_eq!(cd_offset + cd_size, eocd);
        Ok(())
    }

    #[test]
    fn non_ascii_names_set_utf8_flag() -> Result<()> {
        let mut zip = StreamingZipWriter::from_writer(Vec::new());
        zip.add("résumé.txt", &file_meta(0), Some(&mut &b""[..]))?;
        let bytes = zip.finish()?;
        assert_eq!(u16_at(&bytes, 6) & FLAG_UTF8, FLAG_UTF8);
        Ok(())
    }

    #[test]
    fn file_without_content_is_rejected() {
        let mut zip = StreamingZipWriter::from_writer(Vec::new());
        let err = zip.add("a.txt", &file_meta(1), None).unwrap_err();
        assert!(matches!(err, TransferError::Encoding(_)));
        assert_eq!(zip.bytes_written(), 0);
    }

    #[test]
    fn read_failure_names_the_entry() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
            }
        }

        let mut zip = StreamingZipWriter::from_writer(Vec::new());
        let err = zip
            .add("logs/app.log", &file_meta(10), Some(&mut Broken))
            .unwrap_err();
        match err {
            TransferError::Entry { path, .. } => assert_eq!(path, "logs/app.log"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn central_directory_write_failure_is_encoding_error() {
        /// Accepts `limit` bytes, then fails every write
        #[derive(Debug)]
        struct Limited {
            written: usize,
            limit: usize,
        }
        impl Write for Limited {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.written >= self.limit {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
                }
                let n = buf.len().min(self.limit - self.written);
                self.written += n;
                Ok(n)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut zip = StreamingZipWriter::from_writer(Limited {
            written: 0,
            limit: 64,
        });
        // a header-only directory record fits under the limit
        zip.add("docs", &EntryMetadata::directory(UNIX_EPOCH, 0o755), None)
            .unwrap();
        let err = zip.finish().unwrap_err();
        match err {
            TransferError::Encoding(msg) => assert!(msg.contains("peer went away"), "{}", msg),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn compression_method_parses() {
        assert_eq!(
            "deflate".parse::<CompressionMethod>().unwrap(),
            CompressionMethod::Deflate
        );
        assert_eq!(
            "Stored".parse::<CompressionMethod>().unwrap(),
            CompressionMethod::Stored
        );
        assert!("bzip2".parse::<CompressionMethod>().is_err());
    }
}
