//! Archive catalog reader.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading through any [`RemoteFile`].
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all members
//!
//! Only the tail of the file is touched, which keeps the number of range
//! requests small: the trailer read primes the look-behind buffer and the
//! central directory usually comes out of it.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use tracing::debug;

use crate::error::{Error, Result};
use crate::io::RemoteFile;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Read exactly `size` bytes at `offset`, treating a short read as a
/// truncated archive.
pub(crate) async fn read_exact_at(
    file: &mut dyn RemoteFile,
    offset: u64,
    size: u64,
    what: &str,
) -> Result<Vec<u8>> {
    let data = file.read_at(offset, size).await?;
    if (data.len() as u64) < size {
        return Err(Error::bad_container(format!(
            "Truncated archive: {what} at offset {offset} extends past end of file"
        )));
    }
    Ok(data)
}

/// The central directory of an archive.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Read the catalog of the archive stored in `file`.
    pub async fn read(file: &mut dyn RemoteFile) -> Result<Self> {
        let (eocd, eocd_offset) = find_eocd(file).await?;
        if eocd.is_multi_disk() {
            return Err(Error::bad_container("Multi-disk archives are not supported"));
        }

        // Get Central Directory info, using ZIP64 if needed
        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = read_zip64_eocd(file, eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                u64::from(eocd.cd_offset),
                u64::from(eocd.cd_size),
                u64::from(eocd.total_entries),
            )
        };
        if cd_offset.saturating_add(cd_size) > eocd_offset {
            return Err(Error::bad_container("Central directory overlaps its trailer"));
        }
        if total_entries.saturating_mul(CDFH_MIN_SIZE as u64) > cd_size {
            return Err(Error::bad_container("Central directory is too small for its entries"));
        }

        let cd_data = read_exact_at(file, cd_offset, cd_size, "central directory").await?;
        let mut cursor = Cursor::new(cd_data.as_slice());
        let mut entries = Vec::with_capacity(total_entries as usize);
        for _ in 0..total_entries {
            entries.push(parse_cdfh(&mut cursor)?);
        }

        debug!(entries = entries.len(), cd_offset, cd_size, "read archive catalog");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.file_name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.file_name.as_str())
    }
}

/// Find and parse the End of Central Directory record.
///
/// Tries the comment-less position first, then searches backwards through
/// the largest possible comment.
async fn find_eocd(file: &mut dyn RemoteFile) -> Result<(EndOfCentralDirectory, u64)> {
    let size = file.length();

    if size >= EndOfCentralDirectory::SIZE as u64 {
        let offset = size - EndOfCentralDirectory::SIZE as u64;
        let buf = file.read_at(offset, EndOfCentralDirectory::SIZE as u64).await?;

        // Check for signature and zero-length comment
        if buf.len() == EndOfCentralDirectory::SIZE
            && &buf[0..4] == EndOfCentralDirectory::SIGNATURE
            && &buf[20..22] == b"\x00\x00"
        {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }
    }

    let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(size);
    let search_start = size - search_size;
    let buf = file.read_at(search_start, search_size).await?;

    if buf.len() < EndOfCentralDirectory::SIZE {
        return Err(Error::bad_container("File is not a zip file"));
    }

    // Search backwards for EOCD signature (PK\x05\x06)
    for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
        if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
            // The comment length field must account for the remaining bytes.
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let eocd =
                    EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                return Ok((eocd, search_start + i as u64));
            }
        }
    }

    Err(Error::bad_container("File is not a zip file"))
}

/// Read the ZIP64 End of Central Directory record via its locator, which
/// sits immediately before the regular EOCD.
async fn read_zip64_eocd(file: &mut dyn RemoteFile, eocd_offset: u64) -> Result<Zip64EOCD> {
    let locator_offset = eocd_offset
        .checked_sub(Zip64EOCDLocator::SIZE as u64)
        .ok_or_else(|| Error::bad_container("Missing ZIP64 End of Central Directory Locator"))?;
    let locator_buf = read_exact_at(
        file,
        locator_offset,
        Zip64EOCDLocator::SIZE as u64,
        "ZIP64 locator",
    )
    .await?;
    let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;
    if locator.is_multi_disk() {
        return Err(Error::bad_container("Multi-disk archives are not supported"));
    }

    let eocd64_buf = read_exact_at(
        file,
        locator.eocd64_offset,
        Zip64EOCD::MIN_SIZE as u64,
        "ZIP64 end of central directory",
    )
    .await?;
    let eocd64 = Zip64EOCD::from_bytes(&eocd64_buf)?;
    if eocd64.is_multi_disk() {
        return Err(Error::bad_container("Multi-disk archives are not supported"));
    }
    Ok(eocd64)
}

/// Parse one Central Directory File Header.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<CatalogEntry> {
    let truncated = |_| Error::bad_container("Truncated central directory");

    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig).map_err(truncated)?;
    if sig != CDFH_SIGNATURE {
        return Err(Error::bad_container("Invalid Central Directory File Header"));
    }

    let mut fixed = [0u8; CDFH_MIN_SIZE - 4];
    cursor.read_exact(&mut fixed).map_err(truncated)?;
    let mut header = Cursor::new(&fixed[..]);
    let _version_made_by = header.read_u16::<LittleEndian>()?;
    let _version_needed = header.read_u16::<LittleEndian>()?;
    let _flags = header.read_u16::<LittleEndian>()?;
    let compression_method = header.read_u16::<LittleEndian>()?;
    let _last_mod_time = header.read_u16::<LittleEndian>()?;
    let _last_mod_date = header.read_u16::<LittleEndian>()?;
    let _crc32 = header.read_u32::<LittleEndian>()?;
    let compressed_size = u64::from(header.read_u32::<LittleEndian>()?);
    let mut uncompressed_size = u64::from(header.read_u32::<LittleEndian>()?);
    let file_name_length = header.read_u16::<LittleEndian>()?;
    let extra_field_length = header.read_u16::<LittleEndian>()?;
    let file_comment_length = header.read_u16::<LittleEndian>()?;
    let _disk_number_start = header.read_u16::<LittleEndian>()?;
    let _internal_attrs = header.read_u16::<LittleEndian>()?;
    let _external_attrs = header.read_u32::<LittleEndian>()?;
    let mut lfh_offset = u64::from(header.read_u32::<LittleEndian>()?);

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes).map_err(truncated)?;
    let file_name = String::from_utf8_lossy(&file_name_bytes).into_owned();

    let mut extra = vec![0u8; extra_field_length as usize];
    cursor.read_exact(&mut extra).map_err(truncated)?;
    let mut extra = Cursor::new(extra.as_slice());
    while extra.position() + 4 <= extra_field_length as u64 {
        let header_id = extra.read_u16::<LittleEndian>()?;
        let field_size = u64::from(extra.read_u16::<LittleEndian>()?);
        let field_end = extra.position() + field_size;

        if header_id == 0x0001 {
            // ZIP64 extended information: a value is present only when the
            // corresponding header field is saturated.
            if uncompressed_size == 0xFFFFFFFF && extra.position() + 8 <= field_end {
                uncompressed_size = extra.read_u64::<LittleEndian>()?;
            }
            // Stored members only need the uncompressed size.
            if compressed_size == 0xFFFFFFFF && extra.position() + 8 <= field_end {
                extra.set_position(extra.position() + 8);
            }
            if lfh_offset == 0xFFFFFFFF && extra.position() + 8 <= field_end {
                lfh_offset = extra.read_u64::<LittleEndian>()?;
            }
        }
        extra.set_position(field_end);
    }

    // Skip over the file comment (we don't use it)
    cursor.set_position(cursor.position() + u64::from(file_comment_length));

    Ok(CatalogEntry {
        file_name,
        compression_method: CompressionMethod::from_u16(compression_method),
        uncompressed_size,
        lfh_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalRemoteFile;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(comment: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer.set_comment(comment);
        let stored =
            || SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("a.txt", stored()).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.start_file("dir/b.bin", stored()).unwrap();
        writer.write_all(&[7u8; 300]).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        tmp.write_all(&bytes).unwrap();
        tmp
    }

    #[tokio::test]
    async fn test_catalog_lists_entries() {
        let tmp = build_zip("");
        let mut file = LocalRemoteFile::open(tmp.path()).await.unwrap();
        let catalog = Catalog::read(&mut file).await.unwrap();

        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["a.txt", "dir/b.bin"]);
        let b = catalog.get("dir/b.bin").unwrap();
        assert_eq!(b.uncompressed_size, 300);
        assert_eq!(b.compression_method, CompressionMethod::Stored);
        assert!(!catalog.contains("missing"));
    }

    #[tokio::test]
    async fn test_catalog_with_comment() {
        let tmp = build_zip("a comment that pushes the trailer back");
        let mut file = LocalRemoteFile::open(tmp.path()).await.unwrap();
        let catalog = Catalog::read(&mut file).await.unwrap();
        assert_eq!(catalog.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_not_a_zip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0x42u8; 100]).unwrap();
        let mut file = LocalRemoteFile::open(tmp.path()).await.unwrap();
        let err = Catalog::read(&mut file).await.unwrap_err();
        assert!(matches!(err, Error::BadContainer { .. }));
    }
}
