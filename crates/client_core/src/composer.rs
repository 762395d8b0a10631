use std::{ops::Range, path::Path, sync::LazyLock};

use regex::Regex;
use shared::domain::MessageId;
use tracing::{info, warn};

use crate::{
    api::{ChatApi, SendTarget},
    config::MAX_UPLOAD_BYTES,
    error::{ClientError, ClientResult},
};

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{2,}").expect("blank run pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub display_name: String,
    pub remote_url: String,
    pub markdown: String,
}

/// A local file waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl PendingUpload {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|source| ClientError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { name, bytes })
    }
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub name: String,
    pub result: ClientResult<Attachment>,
}

/// Draft text plus the attachments uploaded for it.
#[derive(Debug, Clone)]
pub struct ComposerSession {
    buffer: String,
    attachments: Vec<Attachment>,
    max_upload_bytes: u64,
}

impl Default for ComposerSession {
    fn default() -> Self {
        Self::new(MAX_UPLOAD_BYTES)
    }
}

impl ComposerSession {
    pub fn new(max_upload_bytes: u64) -> Self {
        Self {
            buffer: String::new(),
            attachments: Vec::new(),
            max_upload_bytes,
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn set_buffer(&mut self, text: impl Into<String>) {
        self.buffer = text.into();
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.trim().is_empty() && self.attachments.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.attachments.clear();
    }

    /// Puts a block quote of `text` in front of the draft, once.
    pub fn quote(&mut self, text: &str) {
        let quoted = format!("> {}\n\n", text.trim_end().replace('\n', "\n> "));
        if !self.buffer.contains(&quoted) {
            self.buffer.insert_str(0, &quoted);
        }
    }

    /// Surrounds the byte range `selection` with markers and returns the
    /// cursor position after the closing marker. Returns `None` when the
    /// range does not fall on character boundaries of the draft.
    pub fn wrap_selection(
        &mut self,
        selection: Range<usize>,
        before: &str,
        after: Option<&str>,
    ) -> Option<usize> {
        let selected = self.buffer.get(selection.clone())?.to_string();
        let after = after.unwrap_or(before);
        let wrapped = format!("{before}{selected}{after}");
        self.buffer.replace_range(selection.clone(), &wrapped);
        Some(selection.start + wrapped.len())
    }

    /// Uploads every file independently. One failure never aborts the
    /// others; each outcome is reported in input order.
    pub async fn attach(&mut self, api: &ChatApi, uploads: Vec<PendingUpload>) -> Vec<UploadOutcome> {
        let mut outcomes = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let name = upload.name.clone();
            let result = self.upload_one(api, upload).await;
            match &result {
                Ok(attachment) => {
                    self.append_markdown(&attachment.markdown);
                    self.attachments.push(attachment.clone());
                }
                Err(err) => warn!(file = %name, "composer: upload failed: {err}"),
            }
            outcomes.push(UploadOutcome { name, result });
        }
        outcomes
    }

    pub fn remove_attachment(&mut self, index: usize) -> Option<Attachment> {
        if index >= self.attachments.len() {
            return None;
        }
        let removed = self.attachments.remove(index);
        let without = self.buffer.replacen(&removed.markdown, "", 1);
        self.buffer = BLANK_RUNS.replace_all(&without, "\n").into_owned();
        Some(removed)
    }

    /// Text to send: the draft, or the attachment links when the draft is
    /// blank. `None` when there is nothing to send.
    pub fn outgoing_content(&self) -> Option<String> {
        let text = self.buffer.trim();
        if !text.is_empty() {
            return Some(text.to_string());
        }
        if self.attachments.is_empty() {
            return None;
        }
        Some(
            self.attachments
                .iter()
                .map(|attachment| attachment.markdown.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    /// Sends the draft and clears the session on success. Returns `None`
    /// without a network call when the draft is empty.
    pub async fn send(&mut self, api: &ChatApi, target: &SendTarget) -> ClientResult<Option<MessageId>> {
        let Some(content) = self.outgoing_content() else {
            return Ok(None);
        };
        let response = api.send_message(target, &content).await?;
        self.clear();
        Ok(Some(response.id))
    }

    async fn upload_one(&self, api: &ChatApi, upload: PendingUpload) -> ClientResult<Attachment> {
        let size = upload.bytes.len() as u64;
        if size > self.max_upload_bytes {
            return Err(ClientError::upload_rejected(format!(
                "{} is {size} bytes; the limit is {} bytes",
                upload.name, self.max_upload_bytes
            )));
        }
        let uploaded = api.upload_file(&upload.name, upload.bytes).await?;
        info!(file = %uploaded.filename, "composer: attachment uploaded");
        Ok(Attachment {
            markdown: format!("[{}]({})", uploaded.filename, uploaded.url),
            display_name: upload.name,
            remote_url: uploaded.url,
        })
    }

    fn append_markdown(&mut self, markdown: &str) {
        if !self.buffer.is_empty() && !self.buffer.ends_with('\n') {
            self.buffer.push('\n');
        }
        self.buffer.push_str(markdown);
        self.buffer.push('\n');
    }
}

#[cfg(test)]
#[path = "tests/composer_tests.rs"]
mod tests;
