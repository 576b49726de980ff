//! Out-of-band cache commands sent by the reader application.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// A side-channel command, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlCommand {
    /// Store `content` as a successful chapter envelope under `url`.
    #[serde(rename = "CACHE_CHAPTER")]
    CacheChapter { url: String, content: Value },
    /// Drop the whole chapter namespace.
    #[serde(rename = "CLEAR_CHAPTER_CACHE")]
    ClearChapterCache,
}

#[derive(Debug, Error)]
#[error("malformed control command: {0}")]
pub struct MalformedCommand(String);

impl ControlCommand {
    pub fn parse(raw: &[u8]) -> Result<Self, MalformedCommand> {
        serde_json::from_slice(raw).map_err(|err| MalformedCommand(err.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlCommand::CacheChapter { .. } => "CACHE_CHAPTER",
            ControlCommand::ClearChapterCache => "CLEAR_CHAPTER_CACHE",
        }
    }
}
