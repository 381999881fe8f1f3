//! Streaming ZIP reader - reads ZIP archives entry by entry
//!
//! This is a minimal reader for archives produced by [`crate::StreamingZipWriter`]
//! (and other well-formed ZIP files). It loads the central directory, then
//! decompresses individual entries on demand, checking each against its
//! stored CRC-32.

use crate::error::{Result, TransferError};
use flate2::read::DeflateDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// ZIP local file header signature
const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

/// ZIP central directory signature
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;

/// ZIP end of central directory signature
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

/// ZIP64 end of central directory record signature
const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;

/// EOCD is 22 bytes plus a comment of at most 65535 bytes
const EOCD_SEARCH_WINDOW: u64 = 65557;

/// Entry in the ZIP central directory
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    pub crc32: u32,
    pub external_attributes: u32,
    pub offset: u64,
}

impl ZipEntry {
    /// Directory entries are named with a trailing `/`
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Unix mode stored in the upper half of the external attributes
    pub fn unix_mode(&self) -> u32 {
        self.external_attributes >> 16
    }
}

/// Streaming ZIP archive reader
pub struct StreamingZipReader<R: Read + Seek = BufReader<File>> {
    file: R,
    entries: Vec<ZipEntry>,
}

impl StreamingZipReader<BufReader<File>> {
    /// Open a ZIP file and read its central directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> StreamingZipReader<R> {
    /// Read the central directory from any seekable reader
    pub fn from_reader(mut file: R) -> Result<Self> {
        let entries = read_central_directory(&mut file)?;
        Ok(StreamingZipReader { file, entries })
    }

    /// Get list of all entries in the ZIP, in central directory order
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Find an entry by name
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read an entry's decompressed data and verify its CRC-32
    pub fn read_entry(&mut self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(entry.uncompressed_size as usize);
        self.read_entry_streaming(entry)?.read_to_end(&mut data)?;

        let actual = crc32fast::hash(&data);
        if actual != entry.crc32 {
            return Err(TransferError::ChecksumMismatch {
                name: entry.name.clone(),
                expected: entry.crc32,
                actual,
            });
        }
        Ok(data)
    }

    /// Read an entry by name
    pub fn read_entry_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| TransferError::EntryNotFound(name.to_string()))?
            .clone();

        self.read_entry(&entry)
    }

    /// Get a streaming reader for an entry (for large files)
    /// Returns a reader that decompresses data on-the-fly without loading everything into memory
    pub fn read_entry_streaming(&mut self, entry: &ZipEntry) -> Result<Box<dyn Read + '_>> {
        // Seek to local file header
        self.file.seek(SeekFrom::Start(entry.offset))?;

        let signature = read_u32_le(&mut self.file)?;
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(TransferError::InvalidFormat(format!(
                "Invalid local file header signature for {}",
                entry.name
            )));
        }

        // Skip version, flags, method, time, date, CRC-32 and both sizes;
        // the central directory is authoritative for streamed entries
        self.file.seek(SeekFrom::Current(22))?;

        let filename_len = read_u16_le(&mut self.file)? as i64;
        let extra_len = read_u16_le(&mut self.file)? as i64;
        self.file
            .seek(SeekFrom::Current(filename_len + extra_len))?;

        let limited_reader = (&mut self.file).take(entry.compressed_size);

        match entry.compression_method {
            0 => Ok(Box::new(limited_reader)),
            8 => Ok(Box::new(DeflateDecoder::new(limited_reader))),
            #[cfg(feature = "zstd-support")]
            93 => Ok(Box::new(zstd::Decoder::new(limited_reader)?)),
            method => Err(TransferError::UnsupportedCompression(method)),
        }
    }
}

fn read_central_directory<R: Read + Seek>(file: &mut R) -> Result<Vec<ZipEntry>> {
    let eocd_offset = find_eocd(file)?;
    file.seek(SeekFrom::Start(eocd_offset))?;

    let signature = read_u32_le(file)?;
    if signature != END_OF_CENTRAL_DIRECTORY_SIGNATURE {
        return Err(TransferError::InvalidFormat(format!(
            "Invalid end of central directory signature: 0x{:08x}",
            signature
        )));
    }

    // Skip disk number fields and entries on this disk
    file.seek(SeekFrom::Current(6))?;

    // These values may be placeholder 0xFFFF/0xFFFFFFFF when ZIP64 is used
    let total_entries_16 = read_u16_le(file)?;
    let cd_size_32 = read_u32_le(file)?;
    let cd_offset_32 = read_u32_le(file)?;

    let (total_entries, cd_offset) =
        if total_entries_16 == 0xFFFF || cd_size_32 == 0xFFFFFFFF || cd_offset_32 == 0xFFFFFFFF {
            read_zip64_eocd(file, eocd_offset)?
        } else {
            (total_entries_16 as u64, cd_offset_32 as u64)
        };

    file.seek(SeekFrom::Start(cd_offset))?;

    let mut entries = Vec::with_capacity(total_entries.min(u16::MAX as u64) as usize);
    for _ in 0..total_entries {
        let signature = read_u32_le(file)?;
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(TransferError::InvalidFormat(format!(
                "Invalid central directory signature: 0x{:08x}",
                signature
            )));
        }

        // Skip version made by, version needed, flags
        file.seek(SeekFrom::Current(6))?;
        let compression_method = read_u16_le(file)?;
        // Skip modification time and date
        file.seek(SeekFrom::Current(4))?;
        let crc32 = read_u32_le(file)?;

        // Sizes may be 0xFFFFFFFF placeholders meaning ZIP64
        let compressed_size_32 = read_u32_le(file)?;
        let uncompressed_size_32 = read_u32_le(file)?;
        let filename_len = read_u16_le(file)? as usize;
        let extra_len = read_u16_le(file)? as usize;
        let comment_len = read_u16_le(file)? as usize;

        // Skip disk number and internal attributes
        file.seek(SeekFrom::Current(4))?;
        let external_attributes = read_u32_le(file)?;
        let offset_32 = read_u32_le(file)?;

        let mut filename_buf = vec![0u8; filename_len];
        file.read_exact(&mut filename_buf)?;
        let name = String::from_utf8_lossy(&filename_buf).to_string();

        let mut extra_buf = vec![0u8; extra_len];
        file.read_exact(&mut extra_buf)?;

        let mut compressed_size = compressed_size_32 as u64;
        let mut uncompressed_size = uncompressed_size_32 as u64;
        let mut offset = offset_32 as u64;

        if let Some(zip64) = find_extra_field(&extra_buf, 0x0001) {
            // Values appear only for the fields holding a placeholder, in this order
            let mut values = zip64
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]));
            if uncompressed_size_32 == 0xFFFFFFFF {
                uncompressed_size = values.next().unwrap_or(uncompressed_size);
            }
            if compressed_size_32 == 0xFFFFFFFF {
                compressed_size = values.next().unwrap_or(compressed_size);
            }
            if offset_32 == 0xFFFFFFFF {
                offset = values.next().unwrap_or(offset);
            }
        }

        if comment_len > 0 {
            file.seek(SeekFrom::Current(comment_len as i64))?;
        }

        entries.push(ZipEntry {
            name,
            compressed_size,
            uncompressed_size,
            compression_method,
            crc32,
            external_attributes,
            offset,
        });
    }

    Ok(entries)
}

/// Data of the first extra field with the given header id
fn find_extra_field(extra: &[u8], id: u16) -> Option<&[u8]> {
    let mut i = 0usize;
    while i + 4 <= extra.len() {
        let field_id = u16::from_le_bytes([extra[i], extra[i + 1]]);
        let len = u16::from_le_bytes([extra[i + 2], extra[i + 3]]) as usize;
        i += 4;
        if i + len > extra.len() {
            return None;
        }
        if field_id == id {
            return Some(&extra[i..i + len]);
        }
        i += len;
    }
    None
}

/// Read the ZIP64 end of central directory record via its locator
/// Returns (total entries, central directory offset)
fn read_zip64_eocd<R: Read + Seek>(file: &mut R, eocd_offset: u64) -> Result<(u64, u64)> {
    // The locator is 20 bytes and sits directly before the EOCD
    let locator_offset = eocd_offset.checked_sub(20).ok_or_else(|| {
        TransferError::InvalidFormat("ZIP64 EOCD locator not found".to_string())
    })?;
    file.seek(SeekFrom::Start(locator_offset))?;
    let mut locator = [0u8; 20];
    file.read_exact(&mut locator)?;
    if locator[0..4] != [0x50, 0x4b, 0x06, 0x07] {
        return Err(TransferError::InvalidFormat(
            "ZIP64 EOCD locator not found".to_string(),
        ));
    }
    let zip64_eocd_offset = u64_from_slice(&locator[8..16]);

    file.seek(SeekFrom::Start(zip64_eocd_offset))?;
    let sig = read_u32_le(file)?;
    if sig != ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
        return Err(TransferError::InvalidFormat(format!(
            "Invalid ZIP64 EOCD signature: 0x{:08x}",
            sig
        )));
    }

    // record size (8), versions (4), disk numbers (8), entries on this disk (8)
    file.seek(SeekFrom::Current(28))?;
    let total_entries = read_u64_le(file)?;
    let _cd_size = read_u64_le(file)?;
    let cd_offset = read_u64_le(file)?;

    Ok((total_entries, cd_offset))
}

/// Find the end of central directory record by scanning from the end of the file
fn find_eocd<R: Read + Seek>(file: &mut R) -> Result<u64> {
    let file_size = file.seek(SeekFrom::End(0))?;

    let search_start = file_size.saturating_sub(EOCD_SEARCH_WINDOW);
    file.seek(SeekFrom::Start(search_start))?;

    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;

    buffer
        .windows(4)
        .rposition(|w| w == [0x50, 0x4b, 0x05, 0x06])
        .map(|i| search_start + i as u64)
        .ok_or_else(|| {
            TransferError::InvalidFormat("End of central directory not found".to_string())
        })
}

fn u64_from_slice(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

fn read_u16_le<R: Read>(file: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    file.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32_le<R: Read>(file: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64_le<R: Read>(file: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::EntryMetadata;
    use crate::writer::{CompressionMethod, StreamingZipWriter};
    use std::io::Cursor;
    use std::time::UNIX_EPOCH;

    fn build(method: CompressionMethod) -> Vec<u8> {
        let mut zip = StreamingZipWriter::from_writer_with_method(Vec::new(), method, 6);
        zip.add("dir", &EntryMetadata::directory(UNIX_EPOCH, 0o750), None)
            .unwrap();
        let text = b"The quick brown fox jumps over the lazy dog. ".repeat(200);
        zip.add(
            "dir/fox.txt",
            &EntryMetadata::file(text.len() as u64, UNIX_EPOCH, 0o600),
            Some(&mut &text[..]),
        )
        .unwrap();
        zip.finish().unwrap()
    }

    #[test]
    fn reads_back_deflate_and_stored() -> Result<()> {
        for method in [CompressionMethod::Deflate, CompressionMethod::Stored] {
            let mut reader = StreamingZipReader::from_reader(Cursor::new(build(method)))?;
            let names: Vec<_> = reader.entries().iter().map(|e| e.name.clone()).collect();
            assert_eq!(names, vec!["dir/", "dir/fox.txt"]);

            let dir = reader.entries()[0].clone();
            assert!(dir.is_dir());
            assert_eq!(dir.unix_mode() & 0o7777, 0o750);
            assert!(reader.read_entry(&dir)?.is_empty());

            let data = reader.read_entry_by_name("dir/fox.txt")?;
            assert!(data.starts_with(b"The quick brown fox"));
            assert_eq!(data.len(), 45 * 200);
        }
        Ok(())
    }

    #[test]
    fn detects_crc_mismatch() -> Result<()> {
        let mut bytes = build(CompressionMethod::Stored);
        let entry = StreamingZipReader::from_reader(Cursor::new(bytes.clone()))?.entries()[1].clone();

        // corrupt the first body byte: header (30) + name (11) + extra (9)
        let body = entry.offset as usize + 30 + entry.name.len() + 9;
        bytes[body] ^= 0xFF;

        let mut reader = StreamingZipReader::from_reader(Cursor::new(bytes))?;
        let err = reader.read_entry(&entry).unwrap_err();
        assert!(matches!(err, TransferError::ChecksumMismatch { .. }), "{}", err);
        Ok(())
    }

    #[test]
    fn missing_entry_is_reported() -> Result<()> {
        let mut reader =
            StreamingZipReader::from_reader(Cursor::new(build(CompressionMethod::Deflate)))?;
        let err = reader.read_entry_by_name("nope").unwrap_err();
        assert!(matches!(err, TransferError::EntryNotFound(_)));
        Ok(())
    }

    #[test]
    fn truncated_archive_is_rejected() {
        let bytes = build(CompressionMethod::Deflate);
        let truncated = bytes[..bytes.len() - 30].to_vec();
        assert!(StreamingZipReader::from_reader(Cursor::new(truncated)).is_err());
    }

    #[test]
    fn extra_field_lookup() {
        let extra = [0x55, 0x54, 1, 0, 9, 0x01, 0x00, 2, 0, 0xAA, 0xBB];
        assert_eq!(find_extra_field(&extra, 0x0001), Some(&[0xAA, 0xBB][..]));
        assert_eq!(find_extra_field(&extra, 0x5455), Some(&[9][..]));
        assert_eq!(find_extra_field(&extra, 0x7875), None);
    }
}
