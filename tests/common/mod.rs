//! An axum server answering HEAD and ranged GET requests for a single
//! in-memory resource.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::header::{
    ACCEPT_RANGES, AUTHORIZATION, CONTENT_RANGE, ETAG, HeaderName, LAST_MODIFIED as MODIFIED,
    RANGE, SET_COOKIE, WWW_AUTHENTICATE,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use chrono::DateTime;
use md5::{Digest, Md5};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use vmpack::io::Challenge;

/// `Last-Modified` of the first generation.
pub const LAST_MODIFIED: &str = "Sun, 06 Nov 1994 08:49:37 GMT";
const FIRST_MODIFIED: i64 = 784111777;

pub const REALM: &str = "vmpack-test";
pub const DIGEST_NONCE: &str = "dcd98b7102dd2f0e8b11d0f600bfb0c093";

/// `alice:secret`, base64 encoded.
pub const ALICE_BASIC: &str = "Basic YWxpY2U6c2VjcmV0";

/// The 52-byte resource `a..zA..Z`.
pub fn alphabet() -> Vec<u8> {
    (b'a'..=b'z').chain(b'A'..=b'Z').collect()
}

enum Auth {
    Open,
    /// Exact `Authorization` value to accept.
    Basic(String),
    Digest { username: String, password: String },
}

struct Resource {
    data: Vec<u8>,
    generation: i64,
    ranges: Vec<String>,
    auth: Auth,
    ignore_ranges: bool,
    send_etag: bool,
}

type Shared = Arc<Mutex<Resource>>;

impl Resource {
    fn etag(&self) -> String {
        format!("\"gen-{}\"", self.generation)
    }

    /// Each generation is one second newer than the last.
    fn last_modified(&self) -> String {
        DateTime::from_timestamp(FIRST_MODIFIED + self.generation - 1, 0)
            .unwrap()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }

    fn challenge(&self) -> String {
        match self.auth {
            Auth::Digest { .. } => format!(
                "Digest realm=\"{REALM}\", qop=\"auth\", nonce=\"{DIGEST_NONCE}\", algorithm=MD5"
            ),
            _ => format!("Basic realm=\"{REALM}\""),
        }
    }

    fn authorized(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> bool {
        let given = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        match &self.auth {
            Auth::Open => true,
            Auth::Basic(expected) => given == Some(expected.as_str()),
            Auth::Digest { username, password } => given
                .and_then(Challenge::parse)
                .is_some_and(|c| digest_matches(&c, username, password, method, uri)),
        }
    }
}

fn md5_hex(data: &str) -> String {
    hex::encode(Md5::digest(data))
}

fn digest_matches(
    answer: &Challenge,
    username: &str,
    password: &str,
    method: &Method,
    uri: &Uri,
) -> bool {
    if !answer.scheme.eq_ignore_ascii_case("digest")
        || answer.param("username") != Some(username)
        || answer.param("realm") != Some(REALM)
        || answer.param("nonce") != Some(DIGEST_NONCE)
        || answer.param("uri") != Some(uri.path())
    {
        return false;
    }
    let (Some(nc), Some(cnonce), Some(response)) = (
        answer.param("nc"),
        answer.param("cnonce"),
        answer.param("response"),
    ) else {
        return false;
    };
    let ha1 = md5_hex(&format!("{username}:{REALM}:{password}"));
    let ha2 = md5_hex(&format!("{}:{}", method.as_str(), uri.path()));
    response == md5_hex(&format!("{ha1}:{DIGEST_NONCE}:{nc}:{cnonce}:auth:{ha2}"))
}

pub struct RangeServer {
    addr: SocketAddr,
    state: Shared,
    task: JoinHandle<()>,
}

impl RangeServer {
    pub async fn start(data: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(Resource {
            data,
            generation: 1,
            ranges: Vec::new(),
            auth: Auth::Open,
            ignore_ranges: false,
            send_etag: true,
        }));

        let app = Router::new().fallback(serve).with_state(state.clone());
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, task }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Answer 401 unless requests carry exactly this `Authorization` value.
    pub fn require_authorization(&self, value: &str) {
        self.state.lock().unwrap().auth = Auth::Basic(value.to_string());
    }

    /// Answer 401 with an MD5 Digest challenge unless the request carries a
    /// valid answer for these credentials.
    pub fn require_digest(&self, username: &str, password: &str) {
        self.state.lock().unwrap().auth = Auth::Digest {
            username: username.to_string(),
            password: password.to_string(),
        };
    }

    /// Swap the resource for a new version with a different ETag and a
    /// later Last-Modified.
    pub fn replace(&self, data: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.data = data;
        state.generation += 1;
    }

    /// Answer ranged GETs with the whole resource and status 200.
    pub fn ignore_ranges(&self) {
        self.state.lock().unwrap().ignore_ranges = true;
    }

    /// Stop sending ETags, leaving Last-Modified as the only validator.
    pub fn omit_etag(&self) {
        self.state.lock().unwrap().send_etag = false;
    }

    /// `Range` header values received so far, in order.
    pub fn ranges(&self) -> Vec<String> {
        self.state.lock().unwrap().ranges.clone()
    }
}

impl Drop for RangeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn header(headers: &mut HeaderMap, name: HeaderName, value: String) {
    headers.insert(name, HeaderValue::from_str(&value).unwrap());
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn serve(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let mut resource = state.lock().unwrap();
    if !resource.authorized(&method, &uri, &headers) {
        let challenge = resource.challenge();
        return (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, challenge)]).into_response();
    }

    let mut reply = HeaderMap::new();
    if resource.send_etag {
        header(&mut reply, ETAG, resource.etag());
    }
    header(&mut reply, MODIFIED, resource.last_modified());
    header(&mut reply, ACCEPT_RANGES, "bytes".to_string());

    if method == Method::HEAD {
        header(&mut reply, SET_COOKIE, "session=abc; Path=/".to_string());
        return (reply, resource.data.clone()).into_response();
    }

    let range = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(range) = &range {
        resource.ranges.push(range.clone());
    }
    let length = resource.data.len() as u64;
    let bounds = range
        .filter(|_| !resource.ignore_ranges)
        .and_then(|r| parse_range(&r));
    match bounds {
        Some((start, _)) if start >= length => {
            header(&mut reply, CONTENT_RANGE, format!("bytes */{length}"));
            (StatusCode::RANGE_NOT_SATISFIABLE, reply).into_response()
        }
        Some((start, end)) => {
            let end = end.min(length - 1);
            header(&mut reply, CONTENT_RANGE, format!("bytes {start}-{end}/{length}"));
            let body = resource.data[start as usize..=end as usize].to_vec();
            (StatusCode::PARTIAL_CONTENT, reply, body).into_response()
        }
        None => (reply, resource.data.clone()).into_response(),
    }
}
