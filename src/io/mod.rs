mod auth;
mod buffer;
mod http;
mod local;

pub use auth::{AuthScheme, Challenge, Credentials};
pub use buffer::{FetchPlan, RangeBuffer};
pub use http::HttpRangeFile;
pub use local::LocalRemoteFile;

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;

use crate::config::HttpConfig;
use crate::error::{Error, Result};

/// Change validators captured when a resource is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    /// Strong ETag; weak validators are dropped.
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Validators {
    /// Describe how `other` differs from `self`, if it does.
    pub fn mismatch(&self, other: &Validators) -> Option<String> {
        if self.etag != other.etag {
            Some(format!(
                "ETag changed from {:?} to {:?}",
                self.etag, other.etag
            ))
        } else if self.last_modified != other.last_modified {
            Some(format!(
                "Last-Modified changed from {:?} to {:?}",
                self.last_modified, other.last_modified
            ))
        } else {
            None
        }
    }
}

/// A seekable, read-only byte source with a fixed length.
///
/// Each instance has a single cursor: `read` and `seek` mutate shared state,
/// so callers must not interleave use from several tasks.
#[async_trait]
pub trait RemoteFile: Send {
    /// Read up to `size` bytes at the cursor and advance past them.
    ///
    /// Fewer than `size` bytes come back only when the read crosses the end
    /// of the file.
    async fn read(&mut self, size: u64) -> Result<Vec<u8>>;

    /// Move the cursor. Positions before the start clamp to zero.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    fn tell(&self) -> Result<u64>;

    /// Release the underlying handle. Later operations fail with
    /// [`Error::Closed`].
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    /// Total size in bytes, fixed at open.
    fn length(&self) -> u64;

    fn validators(&self) -> &Validators;

    /// `Cookie` header value captured at open, passed through untouched.
    fn cookies(&self) -> Option<&str>;

    fn url(&self) -> &Url;

    /// Payload bytes received over the network since open.
    fn transferred_bytes(&self) -> u64 {
        0
    }

    fn etag(&self) -> Option<&str> {
        self.validators().etag.as_deref()
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.validators().last_modified
    }

    /// Read up to `size` bytes at an absolute offset.
    async fn read_at(&mut self, offset: u64, size: u64) -> Result<Vec<u8>> {
        self.seek(SeekFrom::Start(offset))?;
        self.read(size).await
    }
}

/// Resolve a seek request against the current cursor and file length.
pub(crate) fn seek_target(current: u64, length: u64, pos: SeekFrom) -> u64 {
    let target = match pos {
        SeekFrom::Start(offset) => i128::from(offset),
        SeekFrom::Current(delta) => i128::from(current) + i128::from(delta),
        SeekFrom::End(delta) => i128::from(length) + i128::from(delta),
    };
    target.clamp(0, i128::from(u64::MAX)) as u64
}

/// Open `location` with the backend its scheme calls for.
///
/// `http`/`https` URLs are read with range requests, `file` URLs and bare
/// paths from the local filesystem.
pub async fn open_url(
    location: &str,
    credentials: Option<(AuthScheme, Credentials)>,
    config: &HttpConfig,
) -> Result<Box<dyn RemoteFile>> {
    let url = match Url::parse(location) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            return Ok(Box::new(LocalRemoteFile::open(Path::new(location)).await?));
        }
        Err(err) => return Err(Error::UnsupportedUrl(format!("{location}: {err}"))),
    };

    match url.scheme() {
        "http" | "https" => Ok(Box::new(
            HttpRangeFile::open(url, credentials, config.clone()).await?,
        )),
        "file" => Ok(Box::new(LocalRemoteFile::open_url(&url).await?)),
        scheme => Err(Error::UnsupportedUrl(format!("{scheme}: URLs not supported"))),
    }
}
