//! Virtual machine packages: a manifest plus domain, disk and memory members
//! in a stored-only archive.
//!
//! Opening a package reads only the archive's catalog, the manifest and the
//! (small) domain descriptor. Disk and memory images are located but never
//! loaded; callers read them by range through [`Package::read_object`] or
//! [`Package::copy_object`], or hand a [`PackageObject`] to something that
//! issues its own range requests.

mod manifest;

pub use manifest::{
    DISK_FILENAME, DOMAIN_FILENAME, MANIFEST_FILENAME, MEMORY_FILENAME, Manifest, NAMESPACE,
};

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use reqwest::Url;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::io::{AuthScheme, Credentials, RemoteFile, open_url};
use crate::zip::{ArchiveResolver, Catalog, Member, MemberExtent, resolve_entry, write_archive};

/// Comment written into archives produced by [`Package::create`].
pub const ARCHIVE_COMMENT: &str = "vmpack package";

/// Upper bound for members read eagerly (manifest and domain descriptor).
const MAX_EAGER_SIZE: u64 = 16 << 20;

/// Chunk size used by [`Package::copy_object`].
const COPY_CHUNK: u64 = 1 << 20;

/// The objects a package can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Domain,
    Disk,
    Memory,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectKind::Domain => "domain",
            ObjectKind::Disk => "disk",
            ObjectKind::Memory => "memory",
        })
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "domain" => Ok(ObjectKind::Domain),
            "disk" => Ok(ObjectKind::Disk),
            "memory" => Ok(ObjectKind::Memory),
            other => Err(format!("unknown object {other:?} (expected domain, disk or memory)")),
        }
    }
}

/// One object inside a package: where its bytes live and how to fetch them.
///
/// Carries the validators and cookies captured when the archive was opened,
/// so a consumer issuing its own range requests against `url` can detect a
/// changed resource the same way the package does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageObject {
    pub url: Url,
    /// Member path inside the archive.
    pub path: String,
    /// Absolute offset of the first payload byte in the archive.
    pub offset: u64,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub cookies: Option<String>,
}

impl PackageObject {
    fn new(file: &dyn RemoteFile, path: &str, extent: MemberExtent) -> Self {
        Self {
            url: file.url().clone(),
            path: path.to_string(),
            offset: extent.offset,
            size: extent.size,
            etag: file.etag().map(str::to_string),
            last_modified: file.last_modified(),
            cookies: file.cookies().map(str::to_string),
        }
    }

    /// One past the object's last byte in the archive, or `None` if that
    /// overflows.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }
}

/// An opened package.
pub struct Package {
    name: String,
    file: Box<dyn RemoteFile>,
    domain: PackageObject,
    domain_data: Vec<u8>,
    disk: PackageObject,
    memory: Option<PackageObject>,
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.name)
            .field("url", self.file.url())
            .field("domain", &self.domain)
            .field("disk", &self.disk)
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

/// Everything `open` learns before the package is assembled.
struct Contents {
    name: String,
    domain: PackageObject,
    domain_data: Vec<u8>,
    disk: PackageObject,
    memory: Option<PackageObject>,
}

/// Read a member small enough to hold in memory.
async fn read_eager(file: &mut dyn RemoteFile, path: &str, extent: MemberExtent) -> Result<Vec<u8>> {
    if extent.size > MAX_EAGER_SIZE {
        return Err(Error::bad_container(format!(
            "Member \"{path}\" is too large ({} bytes)",
            extent.size
        )));
    }
    let data = file.read_at(extent.offset, extent.size).await?;
    if (data.len() as u64) < extent.size {
        return Err(Error::bad_container(format!("Member \"{path}\" is truncated")));
    }
    Ok(data)
}

async fn load(file: &mut dyn RemoteFile) -> Result<Contents> {
    let catalog = Catalog::read(file).await?;

    let entry = catalog
        .get(MANIFEST_FILENAME)
        .ok_or_else(|| Error::bad_container("Package does not contain manifest"))?;
    let extent = resolve_entry(file, entry).await?;
    let manifest = Manifest::parse(&read_eager(file, MANIFEST_FILENAME, extent).await?)?;

    let mut resolver = ArchiveResolver::new(file, &catalog);
    let domain_extent = resolver.resolve(&manifest.domain).await?;
    let disk_extent = resolver.resolve(&manifest.disk).await?;
    let memory_extent = match &manifest.memory {
        Some(path) => Some(resolver.resolve(path).await?),
        None => None,
    };

    let domain_data = read_eager(file, &manifest.domain, domain_extent).await?;

    let domain = PackageObject::new(&*file, &manifest.domain, domain_extent);
    let disk = PackageObject::new(&*file, &manifest.disk, disk_extent);
    let memory = match (&manifest.memory, memory_extent) {
        (Some(path), Some(extent)) => Some(PackageObject::new(&*file, path, extent)),
        _ => None,
    };
    Ok(Contents {
        name: manifest.name,
        domain,
        domain_data,
        disk,
        memory,
    })
}

impl Package {
    /// Open the package at `url` with default HTTP settings.
    ///
    /// `url` may be an `http`, `https` or `file` URL, or a local path. If the
    /// server demands credentials this fails with
    /// [`Error::AuthenticationRequired`]; open again with `credentials`.
    pub async fn open(url: &str, credentials: Option<(AuthScheme, Credentials)>) -> Result<Self> {
        Self::open_with_config(url, credentials, &HttpConfig::default()).await
    }

    pub async fn open_with_config(
        url: &str,
        credentials: Option<(AuthScheme, Credentials)>,
        config: &HttpConfig,
    ) -> Result<Self> {
        let mut file = open_url(url, credentials, config).await?;
        let contents = match load(file.as_mut()).await {
            Ok(contents) => contents,
            Err(err) => {
                file.close();
                return Err(err);
            }
        };

        info!(
            url = %file.url(),
            name = %contents.name,
            disk_size = contents.disk.size,
            memory = contents.memory.is_some(),
            "opened package"
        );
        Ok(Self {
            name: contents.name,
            file,
            domain: contents.domain,
            domain_data: contents.domain_data,
            disk: contents.disk,
            memory: contents.memory,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        self.file.url()
    }

    pub fn domain(&self) -> &PackageObject {
        &self.domain
    }

    /// The domain descriptor, loaded at open.
    pub fn domain_data(&self) -> &[u8] {
        &self.domain_data
    }

    pub fn disk(&self) -> &PackageObject {
        &self.disk
    }

    pub fn memory(&self) -> Option<&PackageObject> {
        self.memory.as_ref()
    }

    pub fn object(&self, kind: ObjectKind) -> Option<&PackageObject> {
        match kind {
            ObjectKind::Domain => Some(&self.domain),
            ObjectKind::Disk => Some(&self.disk),
            ObjectKind::Memory => self.memory.as_ref(),
        }
    }

    /// The archive itself. Reads through it move the shared cursor.
    pub fn file(&self) -> &dyn RemoteFile {
        self.file.as_ref()
    }

    pub fn file_mut(&mut self) -> &mut dyn RemoteFile {
        self.file.as_mut()
    }

    fn require(&self, kind: ObjectKind) -> Result<PackageObject> {
        self.object(kind)
            .cloned()
            .ok_or_else(|| Error::bad_container(format!("Package has no {kind} object")))
    }

    /// Read up to `size` bytes starting `offset` bytes into an object.
    ///
    /// Reads are clamped to the object; an offset at or past its end returns
    /// no data.
    pub async fn read_object(&mut self, kind: ObjectKind, offset: u64, size: u64) -> Result<Vec<u8>> {
        let object = self.require(kind)?;
        if offset >= object.size {
            return Ok(Vec::new());
        }
        let size = size.min(object.size - offset);
        let data = self.file.read_at(object.offset + offset, size).await?;
        if (data.len() as u64) < size {
            return Err(Error::bad_container(format!(
                "Member \"{}\" is truncated",
                object.path
            )));
        }
        Ok(data)
    }

    /// Stream a whole object into `out`, returning the number of bytes written.
    pub async fn copy_object<W>(&mut self, kind: ObjectKind, out: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let object = self.require(kind)?;
        let mut copied = 0u64;
        while copied < object.size {
            let chunk = self.read_object(kind, copied, COPY_CHUNK).await?;
            out.write_all(&chunk).await?;
            copied += chunk.len() as u64;
            debug!(object = %kind, copied, total = object.size, "copied chunk");
        }
        out.flush().await?;
        Ok(copied)
    }

    /// Release the archive. Later reads fail with [`Error::Closed`].
    pub fn close(&mut self) {
        self.file.close();
    }

    /// Write a new package to `out`.
    ///
    /// Members are written in the order manifest, domain, memory (if any),
    /// disk, all stored. The manifest is validated before anything touches
    /// the filesystem; if writing fails afterwards, `out` is removed.
    pub async fn create(
        out: &Path,
        name: &str,
        domain: &[u8],
        disk: &Path,
        memory: Option<&Path>,
    ) -> Result<()> {
        let manifest = Manifest::canonical(name, memory.is_some());
        let xml = manifest.to_xml()?;

        let mut members = vec![
            Member::bytes(MANIFEST_FILENAME, xml),
            Member::bytes(DOMAIN_FILENAME, domain.to_vec()),
        ];
        if let Some(memory) = memory {
            members.push(Member::file(MEMORY_FILENAME, memory));
        }
        members.push(Member::file(DISK_FILENAME, disk));

        let target = out.to_path_buf();
        tokio::task::spawn_blocking(move || write_archive(&target, ARCHIVE_COMMENT, &members))
            .await
            .map_err(|err| Error::Io(std::io::Error::other(err)))??;

        info!(path = %out.display(), name, memory = memory.is_some(), "created package");
        Ok(())
    }
}
