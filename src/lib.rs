//! # vmpack
//!
//! Random access to virtual machine image packages, locally or over HTTP.
//!
//! A package is a ZIP archive whose members are all stored uncompressed: a
//! manifest, a domain descriptor, a disk image and optionally a memory
//! image. Because nothing is compressed, each image occupies a contiguous
//! byte range of the archive and can be read in place with HTTP Range
//! requests instead of downloading and unpacking the whole archive.
//!
//! ## Layers
//!
//! - [`io`]: the [`RemoteFile`] trait with local and HTTP range backends.
//!   The HTTP backend keeps one read-ahead/read-behind buffer and refuses to
//!   mix bytes from two versions of a resource.
//! - [`zip`]: catalog reader, member resolver and stored-only writer.
//! - [`package`]: manifest handling plus [`Package`] open/create.
//!
//! ## Example
//!
//! ```no_run
//! use vmpack::{ObjectKind, Package};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut package = Package::open("https://example.com/vm.nxpk", None).await?;
//!     println!("{} ({} byte disk)", package.name(), package.disk().size);
//!
//!     // The first sector of the disk image, fetched by range request.
//!     let sector = package.read_object(ObjectKind::Disk, 0, 512).await?;
//!     assert_eq!(sector.len(), 512);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod io;
pub mod package;
pub mod zip;

pub use cli::Cli;
pub use config::HttpConfig;
pub use error::{Error, Result};
pub use io::{AuthScheme, Credentials, HttpRangeFile, LocalRemoteFile, RemoteFile, open_url};
pub use package::{Manifest, ObjectKind, Package, PackageObject};
