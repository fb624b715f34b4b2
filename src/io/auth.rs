//! HTTP authentication: challenge parsing and the Basic/Digest strategies.

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Url};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Authentication schemes a package server may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthScheme {
    Basic,
    Digest,
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthScheme::Basic => f.write_str("Basic"),
            AuthScheme::Digest => f.write_str("Digest"),
        }
    }
}

impl FromStr for AuthScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("basic") {
            Ok(AuthScheme::Basic)
        } else if s.eq_ignore_ascii_case("digest") {
            Ok(AuthScheme::Digest)
        } else {
            Err(Error::protocol(format!(
                "Server requested unknown authentication scheme: {s}"
            )))
        }
    }
}

/// Username and password for a package server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A single parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    params: Vec<(String, String)>,
}

impl Challenge {
    /// Parse `Scheme name=token, name="quoted string", ...`.
    ///
    /// Only a single challenge is understood.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme, rest),
            None => (header, ""),
        };
        if scheme.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        let mut chars = rest.chars().peekable();
        loop {
            while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
            let name: String = std::iter::from_fn(|| chars.next_if(|c| *c != '=' && *c != ','))
                .collect();
            let name = name.trim().to_string();
            if name.is_empty() {
                break;
            }
            if chars.next_if_eq(&'=').is_none() {
                // token68 or a bare flag; nothing we need
                continue;
            }
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            let mut value = String::new();
            if chars.next_if_eq(&'"').is_some() {
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => value.extend(chars.next()),
                        '"' => break,
                        c => value.push(c),
                    }
                }
            } else {
                value.extend(std::iter::from_fn(|| chars.next_if(|c| *c != ',')));
                value = value.trim().to_string();
            }
            params.push((name.to_ascii_lowercase(), value));
        }

        Some(Self {
            scheme: scheme.to_string(),
            params,
        })
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn realm(&self) -> Option<&str> {
        self.param("realm")
    }
}

/// Turn a 401 response into the error the caller sees.
///
/// A usable Basic/Digest challenge with a realm becomes
/// [`Error::AuthenticationRequired`]; anything else is a protocol error.
pub(crate) fn authentication_required(url: &Url, header: Option<&str>) -> Error {
    let Some(challenge) = header.and_then(Challenge::parse) else {
        return Error::protocol("Server requested authentication without a challenge");
    };
    let scheme = match challenge.scheme.parse::<AuthScheme>() {
        Ok(scheme) => scheme,
        Err(err) => return err,
    };
    let Some(realm) = challenge.realm() else {
        return Error::protocol("Unknown authentication realm");
    };
    Error::AuthenticationRequired {
        host: host_of(url),
        realm: realm.to_string(),
        scheme,
    }
}

/// `host[:port]` of a URL.
pub(crate) fn host_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Per-scheme request signing.
#[derive(Debug, Clone)]
pub(crate) enum Authenticator {
    None,
    Basic(Credentials),
    Digest(DigestAuth),
}

impl Authenticator {
    pub(crate) fn new(credentials: Option<(AuthScheme, Credentials)>) -> Self {
        match credentials {
            None => Authenticator::None,
            Some((AuthScheme::Basic, creds)) => Authenticator::Basic(creds),
            Some((AuthScheme::Digest, creds)) => Authenticator::Digest(DigestAuth::new(creds)),
        }
    }

    /// Attach credentials to an outgoing request.
    pub(crate) fn apply(&mut self, req: RequestBuilder, method: &Method, url: &Url) -> RequestBuilder {
        match self {
            Authenticator::None => req,
            Authenticator::Basic(creds) => req.basic_auth(&creds.username, Some(&creds.password)),
            Authenticator::Digest(digest) => match digest.authorization(method.as_str(), &request_uri(url)) {
                Some(value) => req.header(AUTHORIZATION, value),
                None => req,
            },
        }
    }

    /// Absorb a 401 challenge. Returns `true` when the request should be
    /// sent again with fresh credentials.
    pub(crate) fn challenge(&mut self, header: Option<&str>) -> bool {
        match self {
            Authenticator::Digest(digest) => header
                .and_then(Challenge::parse)
                .is_some_and(|challenge| digest.update(&challenge)),
            _ => false,
        }
    }
}

fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigestAlgorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    fn parse(name: Option<&str>) -> Option<Self> {
        match name.map(str::to_ascii_uppercase).as_deref() {
            None | Some("MD5") => Some(DigestAlgorithm::Md5),
            Some("MD5-SESS") => Some(DigestAlgorithm::Md5Sess),
            Some("SHA-256") => Some(DigestAlgorithm::Sha256),
            Some("SHA-256-SESS") => Some(DigestAlgorithm::Sha256Sess),
            Some(_) => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Md5Sess => "MD5-sess",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(self) -> bool {
        matches!(self, DigestAlgorithm::Md5Sess | DigestAlgorithm::Sha256Sess)
    }

    fn hash(self, data: &str) -> String {
        match self {
            DigestAlgorithm::Md5 | DigestAlgorithm::Md5Sess => hex::encode(Md5::digest(data)),
            DigestAlgorithm::Sha256 | DigestAlgorithm::Sha256Sess => {
                hex::encode(Sha256::digest(data))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DigestChallenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: DigestAlgorithm,
    qop_auth: bool,
}

/// RFC 7616 digest state: the last challenge seen and its nonce count.
#[derive(Debug, Clone)]
pub(crate) struct DigestAuth {
    credentials: Credentials,
    challenge: Option<DigestChallenge>,
    nonce_count: u32,
}

impl DigestAuth {
    fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            challenge: None,
            nonce_count: 0,
        }
    }

    fn update(&mut self, challenge: &Challenge) -> bool {
        if !challenge.scheme.eq_ignore_ascii_case("digest") {
            return false;
        }
        let (Some(realm), Some(nonce)) = (challenge.realm(), challenge.param("nonce")) else {
            return false;
        };
        let Some(algorithm) = DigestAlgorithm::parse(challenge.param("algorithm")) else {
            debug!(algorithm = ?challenge.param("algorithm"), "unsupported digest algorithm");
            return false;
        };
        let stale = challenge
            .param("stale")
            .is_some_and(|s| s.eq_ignore_ascii_case("true"));
        let next = DigestChallenge {
            realm: realm.to_string(),
            nonce: nonce.to_string(),
            opaque: challenge.param("opaque").map(str::to_string),
            algorithm,
            qop_auth: challenge
                .param("qop")
                .is_some_and(|qop| qop.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth"))),
        };
        // Same nonce and not stale: the server rejected our credentials.
        let retry = stale || self.challenge.as_ref() != Some(&next);
        self.challenge = Some(next);
        self.nonce_count = 0;
        retry
    }

    fn authorization(&mut self, method: &str, uri: &str) -> Option<String> {
        let challenge = self.challenge.as_ref()?;
        self.nonce_count += 1;
        let nc = format!("{:08x}", self.nonce_count);
        let cnonce = hex::encode(rand::random::<[u8; 8]>());
        let response = digest_response(&self.credentials, challenge, method, uri, &nc, &cnonce);

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}, response=\"{}\"",
            self.credentials.username,
            challenge.realm,
            challenge.nonce,
            uri,
            challenge.algorithm.name(),
            response
        );
        if let Some(opaque) = &challenge.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        if challenge.qop_auth {
            header.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{cnonce}\""));
        }
        Some(header)
    }
}

fn digest_response(
    creds: &Credentials,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
    nc: &str,
    cnonce: &str,
) -> String {
    let alg = challenge.algorithm;
    let mut ha1 = alg.hash(&format!(
        "{}:{}:{}",
        creds.username, challenge.realm, creds.password
    ));
    if alg.is_session() {
        ha1 = alg.hash(&format!("{ha1}:{}:{cnonce}", challenge.nonce));
    }
    let ha2 = alg.hash(&format!("{method}:{uri}"));
    if challenge.qop_auth {
        alg.hash(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", challenge.nonce))
    } else {
        alg.hash(&format!("{ha1}:{}:{ha2}", challenge.nonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_challenge() {
        let c = Challenge::parse(r#"Basic realm="x""#).unwrap();
        assert_eq!(c.scheme, "Basic");
        assert_eq!(c.realm(), Some("x"));
    }

    #[test]
    fn test_parse_quoted_commas_and_escapes() {
        let c = Challenge::parse(
            r#"Digest realm="a, \"b\"", qop="auth,auth-int", nonce=abc123 , stale=FALSE"#,
        )
        .unwrap();
        assert_eq!(c.realm(), Some(r#"a, "b""#));
        assert_eq!(c.param("qop"), Some("auth,auth-int"));
        assert_eq!(c.param("NONCE"), Some("abc123"));
        assert_eq!(c.param("stale"), Some("FALSE"));
    }

    #[test]
    fn test_authentication_required_basic() {
        let url = Url::parse("http://example.com:8080/pkg.nxpk").unwrap();
        match authentication_required(&url, Some(r#"Basic realm="x""#)) {
            Error::AuthenticationRequired {
                host,
                realm,
                scheme,
            } => {
                assert_eq!(host, "example.com:8080");
                assert_eq!(realm, "x");
                assert_eq!(scheme, AuthScheme::Basic);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_authentication_required_rejects_unknown() {
        let url = Url::parse("http://example.com/pkg").unwrap();
        assert!(matches!(
            authentication_required(&url, Some(r#"Negotiate realm="x""#)),
            Error::Protocol(_)
        ));
        assert!(matches!(
            authentication_required(&url, Some(r#"Digest nonce="abc""#)),
            Error::Protocol(_)
        ));
        assert!(matches!(
            authentication_required(&url, None),
            Error::Protocol(_)
        ));
    }

    #[test]
    fn test_digest_response_rfc2617_vector() {
        let creds = Credentials::new("Mufasa", "Circle Of Life");
        let challenge = DigestChallenge {
            realm: "testrealm@host.com".into(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".into(),
            opaque: Some("5ccc069c403ebaf9f0171e9517f40e41".into()),
            algorithm: DigestAlgorithm::Md5,
            qop_auth: true,
        };
        let response = digest_response(
            &creds,
            &challenge,
            "GET",
            "/dir/index.html",
            "00000001",
            "0a4f113b",
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn test_digest_retries_only_on_new_nonce() {
        let mut auth = Authenticator::new(Some((
            AuthScheme::Digest,
            Credentials::new("user", "pass"),
        )));
        let header = r#"Digest realm="r", nonce="n1", qop="auth""#;
        assert!(auth.challenge(Some(header)));
        // Same challenge again means the credentials were rejected.
        assert!(!auth.challenge(Some(header)));
        assert!(auth.challenge(Some(r#"Digest realm="r", nonce="n2", qop="auth""#)));
        assert!(auth.challenge(Some(r#"Digest realm="r", nonce="n2", qop="auth", stale=true"#)));
    }

    #[test]
    fn test_digest_header_counts_nonces() {
        let mut digest = DigestAuth::new(Credentials::new("user", "pass"));
        assert!(digest.authorization("GET", "/").is_none());
        digest.update(&Challenge::parse(r#"Digest realm="r", nonce="n", opaque="o", qop="auth""#).unwrap());
        let first = digest.authorization("HEAD", "/pkg").unwrap();
        let second = digest.authorization("GET", "/pkg").unwrap();
        assert!(first.starts_with("Digest username=\"user\""));
        assert!(first.contains("nc=00000001"));
        assert!(first.contains("opaque=\"o\""));
        assert!(second.contains("nc=00000002"));
    }

    #[test]
    fn test_basic_never_retries() {
        let mut auth = Authenticator::new(Some((AuthScheme::Basic, Credentials::new("u", "p"))));
        assert!(!auth.challenge(Some(r#"Basic realm="x""#)));
        assert!(!Authenticator::new(None).challenge(Some(r#"Basic realm="x""#)));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let text = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(text.contains("alice"));
        assert!(!text.contains("hunter2"));
    }
}
