//! Out-of-band cache commands. The channel never raises: whatever goes wrong
//! is logged and the command is dropped.

use std::sync::Arc;

use axum::http::StatusCode;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, CachedResponse, KeyError, NamespaceName, RequestKey, StoreError};
use crate::domain::commands::{ControlCommand, MalformedCommand};
use crate::domain::envelope::Envelope;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Malformed(#[from] MalformedCommand),
    #[error("invalid chapter url: {0}")]
    Key(#[from] KeyError),
    #[error("failed to encode chapter envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied(&'static str),
    Dropped,
}

pub struct ControlChannel {
    store: Arc<dyn CacheStore>,
    chapters: NamespaceName,
}

impl ControlChannel {
    pub fn new(store: Arc<dyn CacheStore>, chapters: NamespaceName) -> Self {
        Self { store, chapters }
    }

    /// Parse and apply a raw message.
    pub async fn handle_message(&self, raw: &[u8]) -> ControlOutcome {
        let command = match ControlCommand::parse(raw) {
            Ok(command) => command,
            Err(err) => {
                debug!(error = %err, "Dropped control message");
                counter!("shelfcache_control_dropped_total", "reason" => "malformed").increment(1);
                return ControlOutcome::Dropped;
            }
        };

        let kind = command.kind();
        match self.apply(command).await {
            Ok(()) => {
                counter!("shelfcache_control_commands_total", "command" => kind).increment(1);
                ControlOutcome::Applied(kind)
            }
            Err(ControlError::Store(err)) => {
                warn!(command = kind, error = %err, "Control command failed in the store");
                counter!("shelfcache_control_dropped_total", "reason" => "store").increment(1);
                ControlOutcome::Dropped
            }
            Err(err) => {
                debug!(command = kind, error = %err, "Dropped control command");
                counter!("shelfcache_control_dropped_total", "reason" => "invalid").increment(1);
                ControlOutcome::Dropped
            }
        }
    }

    pub async fn apply(&self, command: ControlCommand) -> Result<(), ControlError> {
        match command {
            ControlCommand::CacheChapter { url, content } => {
                let key = RequestKey::get(&url)?;
                let body = Envelope::success(content).to_bytes()?;
                self.store
                    .put(&self.chapters, &key, CachedResponse::json(StatusCode::OK, body))
                    .await?;
                debug!(%key, namespace = %self.chapters, "Chapter cached from side channel");
            }
            ControlCommand::ClearChapterCache => {
                let existed = self.store.delete_namespace(&self.chapters).await?;
                info!(namespace = %self.chapters, existed, "Chapter cache cleared");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::cache::MemoryStore;

    fn channel() -> (Arc<MemoryStore>, ControlChannel) {
        let store = Arc::new(MemoryStore::new());
        let chapters = NamespaceName::new("chapters").expect("valid namespace");
        (Arc::clone(&store), ControlChannel::new(store, chapters))
    }

    #[tokio::test]
    async fn cache_chapter_stores_success_envelope() {
        let (store, channel) = channel();
        let outcome = channel
            .handle_message(br#"{"type":"CACHE_CHAPTER","url":"http://reader.local/getBookContent?index=2","content":{"text":"hi"}}"#)
            .await;
        assert_eq!(outcome, ControlOutcome::Applied("CACHE_CHAPTER"));

        let key = RequestKey::get("/getBookContent?index=2").expect("valid key");
        let chapters = NamespaceName::new("chapters").expect("valid namespace");
        let cached = store
            .lookup(&chapters, &key)
            .await
            .expect("lookup")
            .expect("entry stored");
        assert_eq!(cached.status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&cached.body).expect("json body");
        assert_eq!(body, json!({ "isSuccess": true, "data": { "text": "hi" } }));
    }

    #[tokio::test]
    async fn malformed_messages_are_dropped() {
        let (store, channel) = channel();
        for raw in [
            &b"not json"[..],
            br#"{"type":"EVICT_EVERYTHING"}"#,
            br#"{"type":"CACHE_CHAPTER","content":"missing url"}"#,
            br#"{"type":"CACHE_CHAPTER","url":"","content":1}"#,
        ] {
            assert_eq!(channel.handle_message(raw).await, ControlOutcome::Dropped);
        }
        assert!(store.namespaces().await.expect("namespaces").is_empty());
    }

    #[tokio::test]
    async fn clear_on_missing_namespace_is_applied() {
        let (_, channel) = channel();
        let outcome = channel
            .handle_message(br#"{"type":"CLEAR_CHAPTER_CACHE"}"#)
            .await;
        assert_eq!(outcome, ControlOutcome::Applied("CLEAR_CHAPTER_CACHE"));
    }
}
