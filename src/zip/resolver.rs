use tracing::debug;

use crate::error::{Error, Result};
use crate::io::RemoteFile;

use super::parser::{Catalog, read_exact_at};
use super::structures::{CatalogEntry, CompressionMethod, LocalFileHeader};

/// Where a stored member's payload lives inside the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberExtent {
    /// Absolute offset of the first payload byte.
    pub offset: u64,
    pub size: u64,
}

impl MemberExtent {
    /// One past the last payload byte, or `None` if that overflows.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }
}

/// Locates member payloads so they can be read in place.
///
/// The local file header has to be read for every member: the extra field
/// recorded in the central directory may differ in length from the one in
/// the local header, so the central directory alone cannot place the payload.
pub struct ArchiveResolver<'a> {
    file: &'a mut dyn RemoteFile,
    catalog: &'a Catalog,
}

impl<'a> ArchiveResolver<'a> {
    pub fn new(file: &'a mut dyn RemoteFile, catalog: &'a Catalog) -> Self {
        Self { file, catalog }
    }

    /// Resolve the member named `path`.
    pub async fn resolve(&mut self, path: &str) -> Result<MemberExtent> {
        let entry = self
            .catalog
            .get(path)
            .ok_or_else(|| Error::bad_container(format!("Path \"{path}\" missing from package")))?;
        resolve_entry(&mut *self.file, entry).await
    }
}

/// Validate the local header of `entry` and compute its payload extent.
///
/// Rejects members that are compressed or encrypted, whatever their size.
pub async fn resolve_entry(file: &mut dyn RemoteFile, entry: &CatalogEntry) -> Result<MemberExtent> {
    let name = &entry.file_name;
    let buf = read_exact_at(
        file,
        entry.lfh_offset,
        LocalFileHeader::SIZE as u64,
        "local file header",
    )
    .await?;
    let header = LocalFileHeader::from_bytes(&buf)?
        .ok_or_else(|| Error::bad_container(format!("Member \"{name}\" has invalid header")))?;

    for method in [header.compression_method, entry.compression_method] {
        if method != CompressionMethod::Stored {
            return Err(Error::bad_container(format!(
                "Member \"{name}\" is compressed (method {})",
                method.as_u16()
            )));
        }
    }
    if header.is_encrypted() {
        return Err(Error::bad_container(format!("Member \"{name}\" is encrypted")));
    }

    let past_end =
        || Error::bad_container(format!("Member \"{name}\" extends past end of archive"));
    let extent = MemberExtent {
        offset: entry
            .lfh_offset
            .checked_add(header.header_len())
            .ok_or_else(past_end)?,
        // The central directory size wins over the local header, which
        // some producers leave zeroed.
        size: entry.uncompressed_size,
    };
    match extent.end() {
        Some(end) if end <= file.length() => {}
        _ => return Err(past_end()),
    }

    debug!(member = %name, offset = extent.offset, size = extent.size, "resolved member");
    Ok(extent)
}
