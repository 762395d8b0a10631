use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure payload the chat server returns alongside `"result": "error"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{msg}")]
pub struct ApiError {
    #[serde(default)]
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ApiError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            code: None,
        }
    }

    /// Reads the error fields out of an arbitrary response body, if the body
    /// carries any.
    pub fn from_body(body: &serde_json::Value) -> Option<Self> {
        let msg = body.get("msg")?.as_str()?.trim();
        if msg.is_empty() {
            return None;
        }
        Some(Self {
            msg: msg.to_string(),
            code: body
                .get("code")
                .and_then(|code| code.as_str())
                .map(str::to_string),
        })
    }
}
