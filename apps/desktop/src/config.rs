use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use client_core::{
    config::ClientConfig,
    credentials::{CredentialSet, ENV_API_KEY, ENV_EMAIL, ENV_SERVER_URL},
};
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "desktop.toml";
const APP_DIR: &str = "chat-desk";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: Option<String>,
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub min_request_interval_ms: u64,
    pub page_size: u32,
    pub unread_window: u32,
    pub unread_poll_seconds: u64,
    pub credentials_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: None,
            email: None,
            api_key: None,
            min_request_interval_ms: 200,
            page_size: 50,
            unread_window: 100,
            unread_poll_seconds: 30,
            credentials_path: default_credentials_path(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    email: Option<String>,
    api_key: Option<String>,
    min_request_interval_ms: Option<u64>,
    page_size: Option<u32>,
    unread_window: Option<u32>,
    unread_poll_seconds: Option<u64>,
    credentials_path: Option<PathBuf>,
}

impl Settings {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            min_request_interval: Duration::from_millis(self.min_request_interval_ms),
            page_size: self.page_size.max(1),
            unread_window: self.unread_window.max(1),
            unread_poll_interval: Duration::from_secs(self.unread_poll_seconds.max(1)),
            ..ClientConfig::default()
        }
    }

    /// Deployment fallback identity; `None` when nothing was configured.
    pub fn fallback_credentials(&self) -> Option<CredentialSet> {
        if self.server_url.is_none() && self.email.is_none() && self.api_key.is_none() {
            return None;
        }
        Some(CredentialSet::new(
            self.email.clone().unwrap_or_default(),
            self.api_key.clone().unwrap_or_default(),
            self.server_url.clone().unwrap_or_default(),
        ))
    }
}

pub fn default_credentials_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("credentials.json")
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE), |name| std::env::var(name).ok())
}

/// Defaults, then the settings file if present, then environment overrides.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))
        }
    }

    let non_empty = |name: &str| env(name).filter(|value| !value.trim().is_empty());

    if let Some(v) = non_empty(ENV_SERVER_URL) {
        settings.server_url = Some(v);
    }
    if let Some(v) = non_empty(ENV_EMAIL) {
        settings.email = Some(v);
    }
    if let Some(v) = non_empty(ENV_API_KEY) {
        settings.api_key = Some(v);
    }

    if let Some(v) = non_empty("APP__MIN_REQUEST_INTERVAL_MS") {
        settings.min_request_interval_ms = parse_override("APP__MIN_REQUEST_INTERVAL_MS", &v)?;
    }
    if let Some(v) = non_empty("APP__PAGE_SIZE") {
        settings.page_size = parse_override("APP__PAGE_SIZE", &v)?;
    }
    if let Some(v) = non_empty("APP__UNREAD_WINDOW") {
        settings.unread_window = parse_override("APP__UNREAD_WINDOW", &v)?;
    }
    if let Some(v) = non_empty("APP__UNREAD_POLL_SECONDS") {
        settings.unread_poll_seconds = parse_override("APP__UNREAD_POLL_SECONDS", &v)?;
    }
    if let Some(v) = non_empty("APP__CREDENTIALS_PATH") {
        settings.credentials_path = PathBuf::from(v);
    }

    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if file_cfg.server_url.is_some() {
        settings.server_url = file_cfg.server_url;
    }
    if file_cfg.email.is_some() {
        settings.email = file_cfg.email;
    }
    if file_cfg.api_key.is_some() {
        settings.api_key = file_cfg.api_key;
    }
    if let Some(v) = file_cfg.min_request_interval_ms {
        settings.min_request_interval_ms = v;
    }
    if let Some(v) = file_cfg.page_size {
        settings.page_size = v;
    }
    if let Some(v) = file_cfg.unread_window {
        settings.unread_window = v;
    }
    if let Some(v) = file_cfg.unread_poll_seconds {
        settings.unread_poll_seconds = v;
    }
    if let Some(v) = file_cfg.credentials_path {
        settings.credentials_path = v;
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("invalid value '{raw}' for {name}"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
