//! Request identity used as the cache key.

use std::fmt;

use axum::http::{Method, Uri};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("request target must not be empty")]
    Empty,
    #[error("request target `{target}` is not a valid URL: {reason}")]
    InvalidUrl { target: String, reason: String },
}

/// Method plus request target (path and query, verbatim).
///
/// Absolute URLs collapse to their path and query, so `http://host/a?b=1` and
/// `/a?b=1` address the same entry. Fragments never reach the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Method,
    target: String,
}

impl RequestKey {
    pub fn new(method: Method, target: &str) -> Result<Self, KeyError> {
        Ok(Self {
            method,
            target: normalize_target(target)?,
        })
    }

    pub fn get(target: &str) -> Result<Self, KeyError> {
        Self::new(Method::GET, target)
    }

    pub fn from_uri(method: Method, uri: &Uri) -> Self {
        Self {
            method,
            target: origin_target(uri),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// Only `GET` responses are ever written.
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET
    }

    /// Stable hex digest, used as the on-disk file name.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(self.target.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.target)
    }
}

fn normalize_target(raw: &str) -> Result<String, KeyError> {
    let trimmed = raw.trim();
    let target = trimmed
        .split_once('#')
        .map_or(trimmed, |(before, _)| before);
    if target.is_empty() {
        return Err(KeyError::Empty);
    }

    if target.starts_with('/') {
        return Ok(target.to_string());
    }
    if has_scheme(target) {
        let uri = target.parse::<Uri>().map_err(|err| KeyError::InvalidUrl {
            target: target.to_string(),
            reason: err.to_string(),
        })?;
        return Ok(origin_target(&uri));
    }
    Ok(format!("/{target}"))
}

/// `scheme://` at the very start; a `://` later in the query does not count.
fn has_scheme(target: &str) -> bool {
    target.split_once("://").is_some_and(|(scheme, _)| {
        let mut chars = scheme.chars();
        chars.next().is_some_and(|first| first.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

/// Path and query exactly as the request line carries them.
fn origin_target(uri: &Uri) -> String {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/");
    if target.starts_with('/') {
        target.to_string()
    } else {
        format!("/{target}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_and_relative_targets_share_a_key() {
        let absolute =
            RequestKey::get("http://reader.local:1122/getBookContent?url=X&index=3").expect("key");
        let relative = RequestKey::get("/getBookContent?url=X&index=3").expect("key");
        assert_eq!(absolute, relative);
        assert_eq!(absolute.digest(), relative.digest());
    }

    #[test]
    fn query_is_part_of_identity() {
        let first = RequestKey::get("/getBookContent?index=1").expect("key");
        let second = RequestKey::get("/getBookContent?index=2").expect("key");
        assert_ne!(first, second);
        assert_ne!(first.digest(), second.digest());
        assert_eq!(first.path(), "/getBookContent");
    }

    #[test]
    fn method_is_part_of_identity() {
        let get = RequestKey::get("/api/x").expect("key");
        let post = RequestKey::new(Method::POST, "/api/x").expect("key");
        assert_ne!(get, post);
        assert!(get.is_cacheable());
        assert!(!post.is_cacheable());
    }

    #[test]
    fn fragment_and_missing_slash() {
        let key = RequestKey::get("index.html#top").expect("key");
        assert_eq!(key.target(), "/index.html");
        assert_eq!(key.to_string(), "GET /index.html");
    }

    #[test]
    fn rejects_empty_and_broken_targets() {
        assert_eq!(RequestKey::get("  "), Err(KeyError::Empty));
        assert_eq!(RequestKey::get("#only"), Err(KeyError::Empty));
        assert!(matches!(
            RequestKey::get("http://[broken/x"),
            Err(KeyError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn embedded_url_in_query_stays_relative() {
        let key = RequestKey::get("/getBookContent?url=http://book.example/1&index=3")
            .expect("key");
        assert_eq!(
            key.target(),
            "/getBookContent?url=http://book.example/1&index=3"
        );
    }

    #[test]
    fn absolute_target_keeps_query_verbatim() {
        let absolute =
            RequestKey::get("http://reader.local/getBookContent?url=a'b&index=1").expect("key");
        let uri: Uri = "/getBookContent?url=a'b&index=1".parse().expect("uri");
        assert_eq!(absolute, RequestKey::from_uri(Method::GET, &uri));
    }

    #[test]
    fn from_uri_uses_path_and_query() {
        let uri: Uri = "/getBookContent?url=X&index=3".parse().expect("uri");
        let key = RequestKey::from_uri(Method::GET, &uri);
        assert_eq!(key, RequestKey::get("/getBookContent?url=X&index=3").expect("key"));
    }
}
