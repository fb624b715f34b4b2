//! ZIP container handling for stored (uncompressed) archives.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Reads the catalog (central directory) from the archive's tail
//! - [`resolver`]: Turns a catalog entry into the absolute extent of its payload
//! - [`writer`]: Writes new archives with every member stored
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and member data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Because members are stored, a payload occupies a contiguous byte range
//! that can be read directly once its local header has been located.
//!
//! ## Limitations
//!
//! - No compressed or encrypted members
//! - No multi-disk archives

mod parser;
mod resolver;
mod structures;
mod writer;

pub use parser::Catalog;
pub use resolver::{ArchiveResolver, MemberExtent, resolve_entry};
pub use structures::*;
pub use writer::{Member, MemberSource, write_archive};
