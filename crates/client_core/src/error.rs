use shared::domain::NarrowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("chat credentials not configured; sign in first")]
    NotConfigured,
    #[error("chat transport bridge is not available")]
    BridgeUnavailable,
    #[error("request failed ({status}): {message}")]
    Gateway { status: u16, message: String },
    #[error("upload rejected: {reason}")]
    UploadRejected { reason: String },
    /// A fetch finished after its context was replaced. Internal only.
    #[error("result superseded by a newer request")]
    StaleResult,
    #[error("invalid narrow: {0}")]
    InvalidNarrow(#[from] NarrowError),
    #[error("unexpected response payload: {0}")]
    Decode(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn gateway(status: u16, message: impl Into<String>) -> Self {
        Self::Gateway {
            status,
            message: message.into(),
        }
    }

    pub fn upload_rejected(reason: impl Into<String>) -> Self {
        Self::UploadRejected {
            reason: reason.into(),
        }
    }

    /// Whether the view layer should report this error to the user.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::StaleResult)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
