use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Url;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use super::{RemoteFile, Validators, seek_target};
use crate::error::{Error, Result};

/// [`RemoteFile`] backed by a local file.
///
/// The validator is the modification time truncated to whole seconds; there
/// is no ETag and no read cache.
pub struct LocalRemoteFile {
    file: Option<File>,
    path: PathBuf,
    url: Url,
    length: u64,
    validators: Validators,
    offset: u64,
}

impl LocalRemoteFile {
    pub async fn open(path: &Path) -> Result<Self> {
        let path = std::path::absolute(path)?;
        let file = File::open(&path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => Error::NotFound(path.clone()),
            _ => Error::Io(err),
        })?;
        let metadata = file.metadata().await?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, 0));
        let url = Url::from_file_path(&path)
            .map_err(|()| Error::UnsupportedUrl(path.display().to_string()))?;

        debug!(path = %path.display(), length = metadata.len(), "opened local file");
        Ok(Self {
            file: Some(file),
            path,
            url,
            length: metadata.len(),
            validators: Validators {
                etag: None,
                last_modified: mtime,
            },
            offset: 0,
        })
    }

    pub async fn open_url(url: &Url) -> Result<Self> {
        let path = url
            .to_file_path()
            .map_err(|()| Error::UnsupportedUrl(url.to_string()))?;
        Self::open(&path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RemoteFile for LocalRemoteFile {
    async fn read(&mut self, size: u64) -> Result<Vec<u8>> {
        let offset = self.offset;
        let file = self.file.as_mut().ok_or(Error::Closed)?;
        let size = size.min(self.length.saturating_sub(offset));
        let mut buf = Vec::with_capacity(size as usize);
        if size > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
            file.take(size).read_to_end(&mut buf).await?;
        }
        self.offset += buf.len() as u64;
        Ok(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if self.file.is_none() {
            return Err(Error::Closed);
        }
        self.offset = seek_target(self.offset, self.length, pos);
        Ok(self.offset)
    }

    fn tell(&self) -> Result<u64> {
        if self.file.is_none() {
            return Err(Error::Closed);
        }
        Ok(self.offset)
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn validators(&self) -> &Validators {
        &self.validators
    }

    fn cookies(&self) -> Option<&str> {
        None
    }

    fn url(&self) -> &Url {
        &self.url
    }
}
