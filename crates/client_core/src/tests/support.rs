use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use shared::{
    domain::{MessageId, StreamId, UserId},
    protocol::{Message, MessageKind},
};
use tokio::time::Instant;

use crate::{
    api::ChatApi,
    credentials::{CredentialResolver, CredentialSet, MemoryCredentialStore},
    error::ClientResult,
    gateway::{Gateway, GatewayRequest},
    transport::Transport,
};

type Handler = Box<dyn Fn(&GatewayRequest) -> ClientResult<Value> + Send + Sync>;

/// Transport double that records every call and answers from a closure.
pub(crate) struct ScriptedTransport {
    handler: Handler,
    calls: Mutex<Vec<(Instant, GatewayRequest)>>,
}

impl ScriptedTransport {
    pub(crate) fn new(
        handler: impl Fn(&GatewayRequest) -> ClientResult<Value> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn ok(value: Value) -> Arc<Self> {
        Self::new(move |_| Ok(value.clone()))
    }

    pub(crate) fn calls(&self) -> Vec<GatewayRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub(crate) fn call_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn answer(&self, request: GatewayRequest) -> ClientResult<Value> {
        let result = (self.handler)(&request);
        self.calls.lock().unwrap().push((Instant::now(), request));
        result
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, _credentials: &CredentialSet, path_and_query: &str) -> ClientResult<Value> {
        self.answer(GatewayRequest::Get {
            path_and_query: path_and_query.to_string(),
        })
    }

    async fn post(
        &self,
        _credentials: &CredentialSet,
        path: &str,
        form: &[(String, String)],
    ) -> ClientResult<Value> {
        self.answer(GatewayRequest::Post {
            path: path.to_string(),
            form: form.to_vec(),
        })
    }

    async fn upload_file(
        &self,
        _credentials: &CredentialSet,
        filename: &str,
        bytes: Vec<u8>,
    ) -> ClientResult<Value> {
        self.answer(GatewayRequest::Upload {
            filename: filename.to_string(),
            bytes,
        })
    }
}

pub(crate) fn test_credentials() -> CredentialSet {
    CredentialSet::new("me@example.com", "secret-key", "https://chat.example.com")
}

pub(crate) fn configured_resolver() -> Arc<CredentialResolver> {
    Arc::new(CredentialResolver::new(
        Arc::new(MemoryCredentialStore::default()),
        Some(test_credentials()),
    ))
}

pub(crate) fn gateway_over(transport: Arc<dyn Transport>, min_interval: Duration) -> Arc<Gateway> {
    Arc::new(Gateway::new(transport, configured_resolver(), min_interval))
}

pub(crate) fn api_over(transport: Arc<dyn Transport>) -> ChatApi {
    ChatApi::new(gateway_over(transport, Duration::ZERO))
}

pub(crate) fn stream_message(id: i64, stream_id: i64, sender_email: &str) -> Message {
    Message {
        id: MessageId(id),
        kind: MessageKind::Stream,
        sender_id: UserId(id % 7 + 1),
        sender_full_name: sender_email.split('@').next().unwrap_or_default().to_string(),
        sender_email: sender_email.to_string(),
        timestamp: 1_700_000_000 + id,
        stream_id: Some(StreamId(stream_id)),
        subject: None,
        topic: Some("general".to_string()),
        content: Some(format!("message {id}")),
        rendered_content: Some(format!("<p>message {id}</p>")),
        flags: Vec::new(),
    }
}

pub(crate) fn private_message(id: i64, sender_id: i64, sender_email: &str) -> Message {
    Message {
        id: MessageId(id),
        kind: MessageKind::Private,
        sender_id: UserId(sender_id),
        sender_full_name: sender_email.split('@').next().unwrap_or_default().to_string(),
        sender_email: sender_email.to_string(),
        timestamp: 1_700_000_000 + id,
        stream_id: None,
        subject: None,
        topic: None,
        content: Some(format!("direct {id}")),
        rendered_content: None,
        flags: Vec::new(),
    }
}

pub(crate) fn messages_body(messages: &[Message]) -> Value {
    json!({ "result": "success", "msg": "", "messages": messages })
}

pub(crate) fn user_json(id: i64, name: &str, email: &str) -> Value {
    json!({ "user_id": id, "full_name": name, "email": email, "is_bot": false })
}
