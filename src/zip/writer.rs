//! Stored-only archive writer.
//!
//! Every member is written uncompressed so readers can serve payloads by
//! range request. Writing is blocking; async callers run it on the blocking
//! pool.

use std::fs::File;
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::CompressionMethod;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;

use crate::error::{Error, Result};

/// Where a member's payload comes from.
#[derive(Debug, Clone)]
pub enum MemberSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub source: MemberSource,
}

impl Member {
    pub fn bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: MemberSource::Bytes(data),
        }
    }

    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: MemberSource::File(path.into()),
        }
    }
}

fn zip_error(err: ZipError) -> Error {
    match err {
        ZipError::Io(err) => Error::Io(err),
        other => Error::bad_container(format!("Cannot write archive: {other}")),
    }
}

fn open_source(path: &Path) -> Result<File> {
    File::open(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
        _ => Error::Io(err),
    })
}

/// Write `members` in order to a new archive at `out`.
///
/// If anything fails once `out` has been created, it is removed again so a
/// partial archive is never left behind.
pub fn write_archive(out: &Path, comment: &str, members: &[Member]) -> Result<()> {
    let file = File::create(out)?;
    let result = write_members(file, comment, members);
    if let Err(err) = &result {
        warn!(path = %out.display(), error = %err, "removing partial archive");
        if let Err(rm) = std::fs::remove_file(out) {
            warn!(path = %out.display(), error = %rm, "could not remove partial archive");
        }
    }
    result
}

fn write_members(file: File, comment: &str, members: &[Member]) -> Result<()> {
    let mut writer = zip::ZipWriter::new(BufWriter::new(file));
    writer.set_comment(comment);

    for member in members {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        match &member.source {
            MemberSource::Bytes(data) => {
                writer.start_file(member.name.as_str(), options).map_err(zip_error)?;
                std::io::Write::write_all(&mut writer, data)?;
            }
            MemberSource::File(path) => {
                let mut source = open_source(path)?;
                // Images may exceed 4 GiB.
                writer
                    .start_file(member.name.as_str(), options.large_file(true))
                    .map_err(zip_error)?;
                std::io::copy(&mut source, &mut writer)?;
            }
        }
        debug!(member = %member.name, "wrote archive member");
    }

    let mut inner = writer.finish().map_err(zip_error)?;
    std::io::Write::flush(&mut inner)?;
    inner
        .into_inner()
        .map_err(|err| Error::Io(err.into_error()))?
        .sync_all()?;
    Ok(())
}
