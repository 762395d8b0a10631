use std::{sync::Arc, time::Duration};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

use crate::{
    credentials::{CredentialResolver, CredentialSet},
    error::{ClientError, ClientResult},
    transport::Transport,
};

/// Minimum-interval serializer shared by every outbound call.
///
/// Waiters queue on a fair mutex, so turns are handed out in submission
/// order. The slot is stamped when a call is released, not when it
/// finishes: a slow response never holds back the next caller.
pub struct Throttle {
    min_interval: Duration,
    last_issued: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_issued: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Suspends until the floor since the previous release has elapsed.
    pub async fn wait_turn(&self) -> Instant {
        let mut last = self.last_issued.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "gateway: throttling call");
                tokio::time::sleep(wait).await;
            }
        }
        let now = Instant::now();
        *last = Some(now);
        now
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayRequest {
    Get {
        path_and_query: String,
    },
    Post {
        path: String,
        form: Vec<(String, String)>,
    },
    Upload {
        filename: String,
        bytes: Vec<u8>,
    },
}

impl GatewayRequest {
    fn label(&self) -> &str {
        match self {
            Self::Get { path_and_query } => path_and_query,
            Self::Post { path, .. } => path,
            Self::Upload { filename, .. } => filename,
        }
    }
}

/// Single funnel for remote API calls: credential check, throttle, then the
/// transport. No retries happen here.
pub struct Gateway {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialResolver>,
    throttle: Throttle,
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialResolver>,
        min_interval: Duration,
    ) -> Self {
        Self {
            transport,
            credentials,
            throttle: Throttle::new(min_interval),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialResolver> {
        &self.credentials
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    pub async fn call(&self, request: GatewayRequest) -> ClientResult<Value> {
        let credentials = self.ready_credentials().await?;
        self.throttle.wait_turn().await;
        debug!(target_path = request.label(), "gateway: dispatch");
        match request {
            GatewayRequest::Get { path_and_query } => {
                self.transport.get(&credentials, &path_and_query).await
            }
            GatewayRequest::Post { path, form } => {
                self.transport.post(&credentials, &path, &form).await
            }
            GatewayRequest::Upload { filename, bytes } => {
                self.transport
                    .upload_file(&credentials, &filename, bytes)
                    .await
            }
        }
    }

    pub async fn get(&self, path_and_query: impl Into<String>) -> ClientResult<Value> {
        self.call(GatewayRequest::Get {
            path_and_query: path_and_query.into(),
        })
        .await
    }

    pub async fn post(
        &self,
        path: impl Into<String>,
        form: Vec<(String, String)>,
    ) -> ClientResult<Value> {
        self.call(GatewayRequest::Post {
            path: path.into(),
            form,
        })
        .await
    }

    pub async fn upload(&self, filename: impl Into<String>, bytes: Vec<u8>) -> ClientResult<Value> {
        self.call(GatewayRequest::Upload {
            filename: filename.into(),
            bytes,
        })
        .await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path_and_query: impl Into<String>,
    ) -> ClientResult<T> {
        let value = self.get(path_and_query).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn ready_credentials(&self) -> ClientResult<CredentialSet> {
        if !self.transport.is_available() {
            return Err(ClientError::BridgeUnavailable);
        }
        self.credentials.active().await
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
