//! The JSON wrapper shared by chapter content and synthesized failures.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// `{ "isSuccess": bool, "data"?: T, "errorMsg"?: string }`
///
/// Consumers treat `isSuccess: false` as failure whatever the HTTP status is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub is_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            is_success: true,
            data: Some(data),
            error_msg: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            data: None,
            error_msg: Some(message.into()),
        }
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
