use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::{ClientError, ClientResult};

/// Local key the durable credential record is stored under.
pub const CREDENTIALS_KEY: &str = "zulipCredentials";

/// Environment variables carrying the deployment fallback identity.
pub const ENV_EMAIL: &str = "ZULIP_EMAIL";
pub const ENV_API_KEY: &str = "ZULIP_API_KEY";
pub const ENV_SERVER_URL: &str = "ZULIP_REALM_URL";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    pub email: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "serverUrl")]
    pub server_url: String,
}

impl CredentialSet {
    pub fn new(
        email: impl Into<String>,
        api_key: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            server_url: normalize_origin(&server_url.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.email.is_empty() && !self.api_key.is_empty() && !self.server_url.is_empty()
    }

    pub fn origin(&self) -> &str {
        &self.server_url
    }

    pub fn basic_auth_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.email, self.api_key));
        format!("Basic {token}")
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("email", &self.email)
            .field("api_key", &"<redacted>")
            .field("server_url", &self.server_url)
            .finish()
    }
}

fn normalize_origin(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    Environment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    pub credentials: CredentialSet,
    pub source: CredentialSource,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> ClientResult<Option<CredentialSet>>;
    async fn save(&self, credentials: &CredentialSet) -> ClientResult<()>;
    async fn clear(&self) -> ClientResult<()>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<CredentialSet>>,
}

impl MemoryCredentialStore {
    pub fn with_record(credentials: CredentialSet) -> Self {
        Self {
            record: Mutex::new(Some(credentials)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> ClientResult<Option<CredentialSet>> {
        Ok(self.record.lock().await.clone())
    }

    async fn save(&self, credentials: &CredentialSet) -> ClientResult<()> {
        *self.record.lock().await = Some(credentials.clone());
        Ok(())
    }

    async fn clear(&self) -> ClientResult<()> {
        self.record.lock().await.take();
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(rename = "zulipCredentials")]
    credentials: CredentialSet,
}

/// Keeps the credential record in a JSON file, written through a temp file
/// and a rename so a crash never leaves a half-written record.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_error(&self, action: &str, err: impl fmt::Display) -> ClientError {
        ClientError::Storage(format!(
            "failed to {action} '{}': {err}",
            self.path.display()
        ))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> ClientResult<Option<CredentialSet>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.storage_error("read", err)),
        };
        let record: StoredRecord =
            serde_json::from_slice(&raw).map_err(|err| self.storage_error("parse", err))?;
        Ok(Some(record.credentials))
    }

    async fn save(&self, credentials: &CredentialSet) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.storage_error("create parent directory for", err))?;
        }
        let serialized = serde_json::to_vec_pretty(&StoredRecord {
            credentials: credentials.clone(),
        })?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serialized)
            .await
            .map_err(|err| self.storage_error("write", err))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|err| self.storage_error("replace", err))?;
        Ok(())
    }

    async fn clear(&self) -> ClientResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.storage_error("remove", err)),
        }
    }
}

/// Decides which identity is active.
///
/// An explicitly signed-in set wins over the environment fallback, and an
/// incomplete set is never handed out: callers get `NotConfigured` instead
/// and must not issue an unauthenticated request.
pub struct CredentialResolver {
    explicit: RwLock<Option<CredentialSet>>,
    environment: Option<CredentialSet>,
    store: Arc<dyn CredentialStore>,
}

impl CredentialResolver {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        environment: Option<CredentialSet>,
    ) -> Self {
        Self {
            explicit: RwLock::new(None),
            environment,
            store,
        }
    }

    /// Loads a previously persisted record as the explicit set. Returns
    /// whether a usable record was found.
    pub async fn restore(&self) -> ClientResult<bool> {
        let Some(stored) = self.store.load().await? else {
            return Ok(false);
        };
        let stored = CredentialSet::new(stored.email, stored.api_key, stored.server_url);
        if !stored.is_complete() {
            warn!("credentials: ignoring incomplete persisted record");
            return Ok(false);
        }
        info!(email = %stored.email, "credentials: restored persisted sign-in");
        *self.explicit.write().await = Some(stored);
        Ok(true)
    }

    pub async fn resolve(&self) -> ClientResult<ResolvedCredentials> {
        if let Some(explicit) = self.explicit.read().await.as_ref() {
            if explicit.is_complete() {
                return Ok(ResolvedCredentials {
                    credentials: explicit.clone(),
                    source: CredentialSource::Explicit,
                });
            }
        }
        match &self.environment {
            Some(env) if env.is_complete() => Ok(ResolvedCredentials {
                credentials: env.clone(),
                source: CredentialSource::Environment,
            }),
            _ => Err(ClientError::NotConfigured),
        }
    }

    pub async fn active(&self) -> ClientResult<CredentialSet> {
        self.resolve().await.map(|resolved| resolved.credentials)
    }

    pub async fn sign_in(&self, credentials: CredentialSet) -> ClientResult<()> {
        let credentials = CredentialSet::new(
            credentials.email,
            credentials.api_key,
            credentials.server_url,
        );
        if !credentials.is_complete() {
            return Err(ClientError::NotConfigured);
        }
        if let Err(err) = self.store.save(&credentials).await {
            warn!("credentials: sign-in kept in memory only: {err}");
        }
        info!(email = %credentials.email, origin = %credentials.server_url, "credentials: signed in");
        *self.explicit.write().await = Some(credentials);
        Ok(())
    }

    pub async fn sign_out(&self) -> ClientResult<()> {
        self.explicit.write().await.take();
        self.store.clear().await?;
        info!("credentials: signed out");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/credentials_tests.rs"]
mod tests;
