use std::{collections::HashSet, sync::Arc};

use serde_json::{json, Value};
use shared::{
    domain::{Narrow, StreamId, UserId},
    protocol::{
        Anchor, MembersResponse, Message, MessagesResponse, RealmPresence, SendMessageResponse,
        Stream, StreamsResponse, Topic, TopicsResponse, UploadResponse, User, UserResponse,
    },
};
use tracing::info;
use url::form_urlencoded;

use crate::{
    config::{DEFAULT_TOPIC, FEED_PAGE_SIZE},
    error::{ClientError, ClientResult},
    gateway::Gateway,
    transport::form_fields,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub anchor: Anchor,
    pub before: u32,
    pub after: u32,
    pub apply_markdown: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            anchor: Anchor::Newest,
            before: FEED_PAGE_SIZE,
            after: 0,
            apply_markdown: true,
        }
    }
}

impl FetchOptions {
    pub fn newest(before: u32) -> Self {
        Self {
            before,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    Stream {
        stream: String,
        topic: Option<String>,
    },
    Direct {
        recipients: Vec<String>,
    },
}

impl SendTarget {
    fn form(&self, content: &str) -> ClientResult<Vec<(String, String)>> {
        match self {
            Self::Stream { stream, topic } => {
                if stream.trim().is_empty() {
                    return Err(ClientError::Decode(
                        "missing stream name for stream message".to_string(),
                    ));
                }
                let topic = topic
                    .as_deref()
                    .map(str::trim)
                    .filter(|topic| !topic.is_empty())
                    .unwrap_or(DEFAULT_TOPIC);
                Ok(form_fields([
                    ("type", json!("stream")),
                    ("to", json!(stream)),
                    ("topic", json!(topic)),
                    ("content", json!(content)),
                ]))
            }
            Self::Direct { recipients } => {
                let recipients = recipients
                    .iter()
                    .map(|email| email.trim())
                    .filter(|email| !email.is_empty())
                    .collect::<Vec<_>>();
                if recipients.is_empty() {
                    return Err(ClientError::Decode(
                        "missing recipient for direct message".to_string(),
                    ));
                }
                Ok(form_fields([
                    ("type", json!("private")),
                    ("to", json!(serde_json::to_string(&recipients)?)),
                    ("content", json!(content)),
                ]))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub uri: String,
    pub url: String,
    pub filename: String,
}

/// Typed REST operations over the gateway.
#[derive(Clone)]
pub struct ChatApi {
    gateway: Arc<Gateway>,
}

impl ChatApi {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub async fn list_streams(&self) -> ClientResult<Vec<Stream>> {
        let response: StreamsResponse = self.gateway.get_json("/streams").await?;
        Ok(response.streams)
    }

    pub async fn list_topics(&self, stream_id: StreamId) -> ClientResult<Vec<Topic>> {
        let response: TopicsResponse = self
            .gateway
            .get_json(format!("/users/me/{}/topics", stream_id.0))
            .await?;
        Ok(response.topics)
    }

    pub async fn list_users(&self) -> ClientResult<Vec<User>> {
        let response: MembersResponse = self.gateway.get_json("/users").await?;
        Ok(response.members)
    }

    pub async fn get_user(&self, user_id: UserId) -> ClientResult<User> {
        let response: UserResponse = self
            .gateway
            .get_json(format!("/users/{}", user_id.0))
            .await?;
        Ok(response.user)
    }

    pub async fn get_user_by_email(&self, email: &str) -> ClientResult<User> {
        let encoded: String = form_urlencoded::byte_serialize(email.as_bytes()).collect();
        let response: UserResponse = self
            .gateway
            .get_json(format!("/users/{encoded}"))
            .await?;
        Ok(response.user)
    }

    pub async fn get_self(&self) -> ClientResult<User> {
        self.gateway.get_json("/users/me").await
    }

    pub async fn realm_presence(&self) -> ClientResult<RealmPresence> {
        self.gateway.get_json("/realm/presence").await
    }

    pub async fn fetch_messages(
        &self,
        narrow: &Narrow,
        options: FetchOptions,
    ) -> ClientResult<Vec<Message>> {
        let response: MessagesResponse = self
            .gateway
            .get_json(messages_path(narrow, options))
            .await?;
        Ok(response.messages)
    }

    pub async fn search_messages(&self, query: &str) -> ClientResult<Vec<Message>> {
        let narrow = Narrow::search(query.trim());
        self.fetch_messages(&narrow, FetchOptions::default()).await
    }

    /// Latest direct message from each partner, newest first. Built from the
    /// most recent page of private messages, so quiet partners may be absent.
    pub async fn recent_direct_messages(&self) -> ClientResult<Vec<Message>> {
        let mut messages = self
            .fetch_messages(&Narrow::private_messages(), FetchOptions::default())
            .await?;
        messages.sort_by(|a, b| b.id.cmp(&a.id));
        let mut seen = HashSet::new();
        messages.retain(|message| seen.insert(message.sender_id));
        Ok(messages)
    }

    pub async fn send_message(
        &self,
        target: &SendTarget,
        content: &str,
    ) -> ClientResult<SendMessageResponse> {
        let form = target.form(content)?;
        let value = self.gateway.post("/messages", form).await?;
        let response: SendMessageResponse = serde_json::from_value(value)?;
        info!(message_id = response.id.0, "api: message sent");
        Ok(response)
    }

    pub async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> ClientResult<UploadedFile> {
        let value = self.gateway.upload(filename, bytes).await?;
        uploaded_file(filename, value)
    }
}

fn uploaded_file(local_name: &str, value: Value) -> ClientResult<UploadedFile> {
    let response: UploadResponse = serde_json::from_value(value)?;
    let (uri, url) = match (response.uri, response.url) {
        (Some(uri), Some(url)) => (uri, url),
        (Some(uri), None) => (uri.clone(), uri),
        (None, Some(url)) => (url.clone(), url),
        (None, None) => {
            return Err(ClientError::upload_rejected(
                "server returned no upload reference",
            ))
        }
    };
    Ok(UploadedFile {
        uri,
        url,
        filename: response
            .filename
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| local_name.to_string()),
    })
}

pub fn messages_path(narrow: &Narrow, options: FetchOptions) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("anchor", &options.anchor.as_query_value())
        .append_pair("num_before", &options.before.to_string())
        .append_pair("num_after", &options.after.to_string())
        .append_pair("narrow", &narrow.to_query_value())
        .append_pair("client_gravatar", "true")
        .append_pair("apply_markdown", &options.apply_markdown.to_string())
        .finish();
    format!("/messages?{query}")
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
