use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Error, Result};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// General purpose flag bit 0: the member is encrypted.
pub const FLAG_ENCRYPTED: u16 = 0x0001;

/// End of Central Directory (EOCD), 22 bytes plus the archive comment.
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::bad_container("Invalid End of Central Directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }

    pub fn is_multi_disk(&self) -> bool {
        // Saturated fields defer to the ZIP64 record.
        let saturated = |v: u16| v == 0xFFFF;
        (!saturated(self.disk_number) && self.disk_number != 0)
            || (!saturated(self.disk_with_cd) && self.disk_with_cd != 0)
            || (!self.is_zip64() && self.disk_entries != self.total_entries)
    }
}

/// ZIP64 End of Central Directory Locator, 20 bytes.
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::bad_container("Invalid ZIP64 End of Central Directory Locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    /// Some writers record zero disks for a single-disk archive.
    pub fn is_multi_disk(&self) -> bool {
        self.disk_with_eocd64 != 0 || self.total_disks > 1
    }
}

/// ZIP64 End of Central Directory, 56 bytes plus an extensible data sector.
pub struct Zip64EOCD {
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::bad_container("Invalid ZIP64 End of Central Directory"));
        }

        // record size, version made by, version needed
        let mut cursor = Cursor::new(&data[4 + 8 + 2 + 2..]);
        Ok(Self {
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn is_multi_disk(&self) -> bool {
        self.disk_number != 0 || self.disk_with_cd != 0 || self.disk_entries != self.total_entries
    }
}

/// Central Directory File Header (CDFH), 46 bytes before the variable fields.
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Fixed part of a Local File Header (LFH), 30 bytes.
pub struct LocalFileHeader {
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    /// Parse the fixed header. Returns `None` when the magic is wrong.
    pub fn from_bytes(data: &[u8]) -> Result<Option<Self>> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Ok(None);
        }

        // version needed
        let mut cursor = Cursor::new(&data[6..]);
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = CompressionMethod::from_u16(cursor.read_u16::<LittleEndian>()?);
        // mod time, mod date, crc32, compressed size, uncompressed size
        cursor.set_position(cursor.position() + 2 + 2 + 4 + 4 + 4);
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;

        Ok(Some(Self {
            flags,
            compression_method,
            file_name_length,
            extra_field_length,
        }))
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Bytes from the start of this header to the start of the payload.
    pub fn header_len(&self) -> u64 {
        Self::SIZE as u64 + u64::from(self.file_name_length) + u64::from(self.extra_field_length)
    }
}

/// One member as catalogued by the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    /// Payload size declared by the central directory.
    pub uncompressed_size: u64,
    pub lfh_offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_header(flags: u16, method: u16, name_len: u16, extra_len: u16) -> Vec<u8> {
        let mut buf = LocalFileHeader::SIGNATURE.to_vec();
        buf.extend_from_slice(&20u16.to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&method.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(&extra_len.to_le_bytes());
        buf
    }

    #[test]
    fn test_local_header_fields() {
        let header = LocalFileHeader::from_bytes(&local_header(0x0009, 8, 7, 20))
            .unwrap()
            .unwrap();
        assert!(header.is_encrypted());
        assert_eq!(header.compression_method, CompressionMethod::Deflate);
        assert_eq!(header.header_len(), 30 + 7 + 20);
    }

    #[test]
    fn test_local_header_bad_magic() {
        let mut buf = local_header(0, 0, 1, 0);
        buf[3] = 0x05;
        assert!(LocalFileHeader::from_bytes(&buf).unwrap().is_none());
        assert!(LocalFileHeader::from_bytes(&buf[..10]).unwrap().is_none());
    }

    #[test]
    fn test_eocd_rejects_garbage() {
        assert!(EndOfCentralDirectory::from_bytes(&[0u8; 22]).is_err());
    }

    fn zip64_eocd(disk_number: u32, disk_entries: u64, total_entries: u64) -> Vec<u8> {
        let mut buf = Zip64EOCD::SIGNATURE.to_vec();
        buf.extend_from_slice(&44u64.to_le_bytes());
        buf.extend_from_slice(&45u16.to_le_bytes());
        buf.extend_from_slice(&45u16.to_le_bytes());
        buf.extend_from_slice(&disk_number.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&disk_entries.to_le_bytes());
        buf.extend_from_slice(&total_entries.to_le_bytes());
        buf.extend_from_slice(&1234u64.to_le_bytes());
        buf.extend_from_slice(&5678u64.to_le_bytes());
        buf
    }

    #[test]
    fn test_zip64_eocd_fields() {
        let eocd = Zip64EOCD::from_bytes(&zip64_eocd(0, 3, 3)).unwrap();
        assert_eq!(eocd.total_entries, 3);
        assert_eq!(eocd.cd_size, 1234);
        assert_eq!(eocd.cd_offset, 5678);
        assert!(!eocd.is_multi_disk());

        assert!(Zip64EOCD::from_bytes(&zip64_eocd(1, 3, 3)).unwrap().is_multi_disk());
        assert!(Zip64EOCD::from_bytes(&zip64_eocd(0, 2, 3)).unwrap().is_multi_disk());
    }

    #[test]
    fn test_zip64_locator_disks() {
        let locator = |disk: u32, total: u32| {
            let mut buf = Zip64EOCDLocator::SIGNATURE.to_vec();
            buf.extend_from_slice(&disk.to_le_bytes());
            buf.extend_from_slice(&99u64.to_le_bytes());
            buf.extend_from_slice(&total.to_le_bytes());
            Zip64EOCDLocator::from_bytes(&buf).unwrap()
        };
        assert_eq!(locator(0, 1).eocd64_offset, 99);
        assert!(!locator(0, 1).is_multi_disk());
        assert!(!locator(0, 0).is_multi_disk());
        assert!(locator(0, 2).is_multi_disk());
        assert!(locator(1, 1).is_multi_disk());
    }
}
