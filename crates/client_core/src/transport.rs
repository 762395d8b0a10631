//! Boundary between the client core and the remote chat API.
//!
//! The core only ever talks to a [`Transport`]; the gateway supplies the
//! credentials for each call. `HttpTransport` is the production
//! implementation, `MissingTransport` stands in when nothing is wired.

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde_json::Value;
use shared::error::ApiError;
use tracing::debug;

use crate::{
    credentials::CredentialSet,
    error::{ClientError, ClientResult},
};

pub const API_PREFIX: &str = "/api/v1";
pub const UPLOAD_PATH: &str = "/user_uploads";

#[async_trait]
pub trait Transport: Send + Sync {
    /// `false` when no bridge is wired; the gateway fails fast on it.
    fn is_available(&self) -> bool {
        true
    }

    async fn get(&self, credentials: &CredentialSet, path_and_query: &str) -> ClientResult<Value>;

    async fn post(
        &self,
        credentials: &CredentialSet,
        path: &str,
        form: &[(String, String)],
    ) -> ClientResult<Value>;

    async fn upload_file(
        &self,
        credentials: &CredentialSet,
        filename: &str,
        bytes: Vec<u8>,
    ) -> ClientResult<Value>;
}

pub struct MissingTransport;

#[async_trait]
impl Transport for MissingTransport {
    fn is_available(&self) -> bool {
        false
    }

    async fn get(&self, _credentials: &CredentialSet, _path_and_query: &str) -> ClientResult<Value> {
        Err(ClientError::BridgeUnavailable)
    }

    async fn post(
        &self,
        _credentials: &CredentialSet,
        _path: &str,
        _form: &[(String, String)],
    ) -> ClientResult<Value> {
        Err(ClientError::BridgeUnavailable)
    }

    async fn upload_file(
        &self,
        _credentials: &CredentialSet,
        _filename: &str,
        _bytes: Vec<u8>,
    ) -> ClientResult<Value> {
        Err(ClientError::BridgeUnavailable)
    }
}

pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    async fn finish(&self, request: reqwest::RequestBuilder) -> ClientResult<Value> {
        let response = request
            .send()
            .await
            .map_err(|err| ClientError::gateway(0, format!("request failed: {err}")))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| ClientError::gateway(status, format!("failed to read body: {err}")))?;
        interpret_response(status, &body)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, credentials: &CredentialSet, path_and_query: &str) -> ClientResult<Value> {
        let url = api_url(credentials.origin(), path_and_query);
        debug!(%url, "transport: GET");
        self.finish(
            self.http
                .get(url)
                .header(reqwest::header::AUTHORIZATION, credentials.basic_auth_header()),
        )
        .await
    }

    async fn post(
        &self,
        credentials: &CredentialSet,
        path: &str,
        form: &[(String, String)],
    ) -> ClientResult<Value> {
        let url = api_url(credentials.origin(), path);
        debug!(%url, fields = form.len(), "transport: POST");
        self.finish(
            self.http
                .post(url)
                .header(reqwest::header::AUTHORIZATION, credentials.basic_auth_header())
                .form(form),
        )
        .await
    }

    async fn upload_file(
        &self,
        credentials: &CredentialSet,
        filename: &str,
        bytes: Vec<u8>,
    ) -> ClientResult<Value> {
        let url = api_url(credentials.origin(), UPLOAD_PATH);
        let mime = mime_guess::from_path(filename).first_or_octet_stream();
        debug!(%url, filename, size = bytes.len(), mime = %mime, "transport: upload");
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime.essence_str())
            .map_err(|err| ClientError::upload_rejected(format!("invalid content type: {err}")))?;
        let form = multipart::Form::new().part("file", part);
        self.finish(
            self.http
                .post(url)
                .header(reqwest::header::AUTHORIZATION, credentials.basic_auth_header())
                .multipart(form),
        )
        .await
    }
}

pub fn api_url(origin: &str, path: &str) -> String {
    let origin = origin.trim_end_matches('/');
    let separator = if path.starts_with('/') { "" } else { "/" };
    format!("{origin}{API_PREFIX}{separator}{path}")
}

/// Maps a raw HTTP outcome to the uniform gateway contract: non-2xx statuses
/// and `"result": "error"` bodies both fail, carrying the server's message
/// when it sent one.
pub fn interpret_response(status: u16, body: &[u8]) -> ClientResult<Value> {
    let json: Value = serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(Default::default()));
    let is_error_result = json.get("result").and_then(Value::as_str) == Some("error");
    if !(200..300).contains(&status) || is_error_result {
        let message = ApiError::from_body(&json)
            .map(|err| err.msg)
            .unwrap_or_else(|| format!("HTTP {status}"));
        return Err(ClientError::gateway(status, message));
    }
    Ok(json)
}

/// Form-encodes a body the way the chat API expects: strings verbatim,
/// everything else as JSON.
pub fn form_fields<I, K>(fields: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    fields
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (key.into(), value)
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
