use std::io::SeekFrom;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{
    CONTENT_LENGTH, CONTENT_RANGE, ETAG, HeaderMap, LAST_MODIFIED, RANGE, WWW_AUTHENTICATE,
};
use reqwest::{Client, Method, Response, StatusCode, Url};
use tracing::{debug, info, trace, warn};

use super::auth::{self, AuthScheme, Authenticator, Credentials};
use super::buffer::RangeBuffer;
use super::{RemoteFile, Validators, seek_target};
use crate::config::HttpConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Open,
    /// The resource changed under us; every further read fails.
    Changed(String),
    Closed,
}

/// [`RemoteFile`] backed by HTTP Range requests.
///
/// A HEAD probe at open records the length, validators and session cookies.
/// Reads go through a single-region cache (see [`RangeBuffer`]) and every
/// range response is checked against the validators captured at open.
pub struct HttpRangeFile {
    client: Option<Client>,
    url: Url,
    auth: Authenticator,
    buffer_size: u64,
    length: u64,
    validators: Validators,
    cookies: Option<String>,
    offset: u64,
    buffer: RangeBuffer,
    state: State,
    transferred_bytes: u64,
}

impl HttpRangeFile {
    /// Probe `url` and open it.
    ///
    /// A 401 with a usable Basic or Digest challenge fails with
    /// [`Error::AuthenticationRequired`] so the caller can retry with
    /// credentials.
    pub async fn open(
        url: Url,
        credentials: Option<(AuthScheme, Credentials)>,
        config: HttpConfig,
    ) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .cookie_provider(jar.clone());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        let mut auth = Authenticator::new(credentials);

        let resp = send(&client, &mut auth, Method::HEAD, &url, None).await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(auth::authentication_required(
                &url,
                header_str(resp.headers(), WWW_AUTHENTICATE.as_str()),
            ));
        }
        if !status.is_success() {
            return Err(Error::protocol(format!(
                "HTTP request failed with status: {status}"
            )));
        }
        // 2xx codes other than 200 are unexpected
        if status != StatusCode::OK {
            return Err(Error::protocol(format!("Unexpected status code {status}")));
        }

        let length = header_str(resp.headers(), CONTENT_LENGTH.as_str())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::protocol("Server did not provide Content-Length"))?;
        let validators = validators_of(resp.headers());
        let cookies = jar
            .cookies(&url)
            .and_then(|value| value.to_str().ok().map(str::to_string));

        info!(
            %url,
            length,
            etag = ?validators.etag,
            last_modified = ?validators.last_modified,
            "opened remote file"
        );
        Ok(Self {
            client: Some(client),
            url,
            auth,
            buffer_size: config.buffer_size,
            length,
            validators,
            cookies,
            offset: 0,
            buffer: RangeBuffer::default(),
            state: State::Open,
            transferred_bytes: 0,
        })
    }

    /// The region currently cached.
    pub fn buffer(&self) -> &RangeBuffer {
        &self.buffer
    }

    fn ensure_readable(&self) -> Result<()> {
        match &self.state {
            State::Open => Ok(()),
            State::Changed(what) => Err(Error::ResourceChanged(what.clone())),
            State::Closed => Err(Error::Closed),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Closed => Err(Error::Closed),
            _ => Ok(()),
        }
    }

    /// Fetch exactly `len` bytes at `start`.
    async fn fetch(&mut self, start: u64, len: u64) -> Result<Vec<u8>> {
        let end = start + len - 1;
        let range = format!("bytes={start}-{end}");
        let client = self.client.as_ref().ok_or(Error::Closed)?;
        let resp = send(
            client,
            &mut self.auth,
            Method::GET,
            &self.url,
            Some(&range),
        )
        .await?;

        let status = resp.status();
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(Error::protocol(format!(
                "Server ignored range request {range} (status {status})"
            )));
        }
        if let Some(what) = self.validators.mismatch(&validators_of(resp.headers())) {
            warn!(url = %self.url, %what, "resource changed on server");
            self.buffer.clear();
            self.state = State::Changed(what.clone());
            return Err(Error::ResourceChanged(what));
        }
        if let Some(content_range) = header_str(resp.headers(), CONTENT_RANGE.as_str()) {
            if !content_range.starts_with(&format!("bytes {start}-{end}/")) {
                return Err(Error::protocol(format!(
                    "Server answered {range} with Content-Range {content_range}"
                )));
            }
        }

        let body = resp.bytes().await?;
        if body.len() as u64 != len {
            return Err(Error::protocol(format!(
                "Short range response for {range}: got {} bytes",
                body.len()
            )));
        }
        self.transferred_bytes += len;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RemoteFile for HttpRangeFile {
    async fn read(&mut self, size: u64) -> Result<Vec<u8>> {
        self.ensure_readable()?;
        let size = size.min(self.length.saturating_sub(self.offset));
        if size == 0 {
            return Ok(Vec::new());
        }

        let plan = self
            .buffer
            .plan(self.offset, size, self.length, self.buffer_size);
        let fetched = match plan.fetch_range() {
            Some((start, len)) => {
                debug!(
                    case = plan.label(),
                    offset = self.offset,
                    size,
                    start,
                    end = start + len - 1,
                    "range fetch"
                );
                self.fetch(start, len).await?
            }
            None => {
                trace!(offset = self.offset, size, "served from buffer");
                Vec::new()
            }
        };

        let data = self.buffer.complete(plan, self.offset, size, fetched);
        self.offset += data.len() as u64;
        Ok(data)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        self.offset = seek_target(self.offset, self.length, pos);
        Ok(self.offset)
    }

    fn tell(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.offset)
    }

    fn close(&mut self) {
        self.state = State::Closed;
        self.buffer.clear();
        // Dropping the client releases its pooled connections.
        self.client = None;
    }

    fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn validators(&self) -> &Validators {
        &self.validators
    }

    fn cookies(&self) -> Option<&str> {
        self.cookies.as_deref()
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }
}

/// Send one request, answering a fresh Digest challenge once.
async fn send(
    client: &Client,
    auth: &mut Authenticator,
    method: Method,
    url: &Url,
    range: Option<&str>,
) -> Result<Response> {
    let mut retried = false;
    loop {
        let mut req = client.request(method.clone(), url.clone());
        if let Some(range) = range {
            req = req.header(RANGE, range);
        }
        let resp = auth.apply(req, &method, url).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED
            && !retried
            && auth.challenge(header_str(resp.headers(), WWW_AUTHENTICATE.as_str()))
        {
            debug!(%url, "answering authentication challenge");
            retried = true;
            continue;
        }
        return Ok(resp);
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn validators_of(headers: &HeaderMap) -> Validators {
    let etag = header_str(headers, ETAG.as_str())
        .filter(|etag| !etag.starts_with("W/"))
        .map(str::to_string);
    let last_modified = header_str(headers, LAST_MODIFIED.as_str()).and_then(parse_http_date);
    Validators {
        etag,
        last_modified,
    }
}

/// Best-effort HTTP-date parse; unparseable dates count as absent.
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
