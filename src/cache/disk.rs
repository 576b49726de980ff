//! Filesystem store: one directory per namespace, one JSON file per entry.
//!
//! Layout: `{root}/{namespace}/{sha256(key)}.json`. Writes go to a hidden
//! temporary file in the namespace directory and are renamed into place, so a
//! reader sees either the previous entry or the new one. Dropping a namespace
//! renames its directory to a hidden tombstone first, so the drop takes effect
//! at once even while a write is still landing in it.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::keys::RequestKey;
use super::namespace::NamespaceName;
use super::store::{CacheStore, CachedResponse, StoreError};

const ENTRY_EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    status: u16,
    /// Header values are base64, since they may hold arbitrary octets.
    headers: Vec<(String, String)>,
    body: String,
    #[serde(with = "time::serde::rfc3339")]
    stored_at: OffsetDateTime,
}

pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn namespace_dir(&self, namespace: &NamespaceName) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    fn entry_path(&self, namespace: &NamespaceName, key: &RequestKey) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.{ENTRY_EXTENSION}", key.digest()))
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn open(&self, namespace: &NamespaceName) -> Result<(), StoreError> {
        fs::create_dir_all(self.namespace_dir(namespace)).await?;
        Ok(())
    }

    async fn lookup(
        &self,
        namespace: &NamespaceName,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, StoreError> {
        let path = self.entry_path(namespace, key);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let entry: DiskEntry = serde_json::from_slice(&raw).map_err(|err| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;

        if entry.key != key.to_string() {
            warn!(
                path = %path.display(),
                stored = %entry.key,
                requested = %key,
                "Cache entry digest collision; treating as miss"
            );
            return Ok(None);
        }

        decode_entry(entry).map(Some).map_err(|reason| StoreError::Corrupt {
            path: path.display().to_string(),
            reason,
        })
    }

    async fn put(
        &self,
        namespace: &NamespaceName,
        key: &RequestKey,
        response: CachedResponse,
    ) -> Result<(), StoreError> {
        if !key.is_cacheable() {
            return Err(StoreError::Uncacheable(key.to_string()));
        }

        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir).await?;

        let encoded = serde_json::to_vec(&encode_entry(key, response))?;
        let temp = dir.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        fs::write(&temp, encoded).await?;

        if let Err(err) = fs::rename(&temp, self.entry_path(namespace, key)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn delete(
        &self,
        namespace: &NamespaceName,
        key: &RequestKey,
    ) -> Result<bool, StoreError> {
        match fs::remove_file(self.entry_path(namespace, key)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn namespaces(&self) -> Result<Vec<NamespaceName>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(raw) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            match NamespaceName::new(raw) {
                Ok(name) => names.push(name),
                Err(err) => debug!(error = %err, "Skipping foreign directory in cache root"),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_namespace(&self, namespace: &NamespaceName) -> Result<bool, StoreError> {
        let tombstone = self
            .root
            .join(format!(".{namespace}.{}.trash", Uuid::new_v4().simple()));
        match fs::rename(self.namespace_dir(namespace), &tombstone).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        }

        if let Err(err) = fs::remove_dir_all(&tombstone).await {
            warn!(
                %namespace,
                path = %tombstone.display(),
                error = %err,
                "Namespace dropped but its tombstone could not be removed"
            );
        }
        Ok(true)
    }
}

fn encode_entry(key: &RequestKey, response: CachedResponse) -> DiskEntry {
    let headers = response
        .headers
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), STANDARD.encode(value.as_bytes())))
        .collect();

    DiskEntry {
        key: key.to_string(),
        status: response.status.as_u16(),
        headers,
        body: STANDARD.encode(&response.body),
        stored_at: OffsetDateTime::now_utc(),
    }
}

fn decode_entry(entry: DiskEntry) -> Result<CachedResponse, String> {
    let status = StatusCode::from_u16(entry.status).map_err(|err| err.to_string())?;
    let body = STANDARD
        .decode(entry.body.as_bytes())
        .map_err(|err| err.to_string())?;

    let mut headers = Vec::with_capacity(entry.headers.len());
    for (name, value) in entry.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| err.to_string())?;
        let raw = STANDARD
            .decode(value.as_bytes())
            .map_err(|err| err.to_string())?;
        let value = HeaderValue::from_bytes(&raw).map_err(|err| err.to_string())?;
        headers.push((name, value));
    }

    Ok(CachedResponse {
        status,
        headers,
        body: Bytes::from(body),
    })
}
