use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{MessageId, Narrow},
    protocol::{Message, User},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod api;
pub mod composer;
pub mod config;
pub mod content;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod transport;
pub mod unread;

use crate::{
    api::{ChatApi, SendTarget},
    config::ClientConfig,
    content::ContentNormalizer,
    credentials::{CredentialResolver, CredentialSet, CredentialStore},
    directory::DirectoryCache,
    error::ClientResult,
    feed::{FeedController, FeedSnapshot, FeedUpdate},
    gateway::Gateway,
    transport::{MissingTransport, Transport},
    unread::{UnreadAggregator, UnreadCounts, UnreadPoller},
};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    SignedIn { email: String, origin: String },
    SignedOut,
    FeedUpdated { narrow: Option<Narrow>, update: FeedUpdate },
    UnreadCountsUpdated(UnreadCounts),
    Error(String),
}

/// What a view layer needs from the client.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    async fn sign_in(&self, credentials: CredentialSet) -> Result<()>;
    async fn sign_out(&self) -> Result<()>;
    async fn select_narrow(&self, narrow: Narrow) -> Result<FeedUpdate>;
    async fn load_older(&self) -> Result<FeedUpdate>;
    async fn refresh(&self) -> Result<FeedUpdate>;
    async fn feed_snapshot(&self) -> FeedSnapshot;
    async fn render(&self, message: &Message) -> Result<String>;
    async fn resolve_sender(&self, message: &Message) -> Result<User>;
    async fn send_message(&self, target: &SendTarget, content: &str) -> Result<MessageId>;
    async fn unread_counts(&self) -> UnreadCounts;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

struct UnreadPolling {
    poller: UnreadPoller,
    forwarder: JoinHandle<()>,
}

/// Client core for one signed-in identity: the gateway, the REST surface,
/// and the caches built on top of it.
pub struct ChatClient {
    config: ClientConfig,
    credentials: Arc<CredentialResolver>,
    api: ChatApi,
    directory: Arc<DirectoryCache>,
    feed: FeedController,
    unread: Arc<UnreadAggregator>,
    normalizer: Mutex<Option<Arc<ContentNormalizer>>>,
    unread_polling: Mutex<Option<UnreadPolling>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    /// A client with no transport wired; every remote call fails with
    /// `BridgeUnavailable`.
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Arc<Self> {
        Self::new_with_dependencies(config, Arc::new(MissingTransport), store, None)
    }

    pub fn new_with_dependencies(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        environment: Option<CredentialSet>,
    ) -> Arc<Self> {
        let credentials = Arc::new(CredentialResolver::new(store, environment));
        let gateway = Arc::new(Gateway::new(
            transport,
            Arc::clone(&credentials),
            config.min_request_interval,
        ));
        let api = ChatApi::new(gateway);
        let source = Arc::new(api.clone());
        let directory = DirectoryCache::new(source.clone(), config.directory_lookup_delay);
        let feed = FeedController::new(source.clone(), config.page_size);
        let unread = Arc::new(UnreadAggregator::new(
            source,
            Arc::clone(&credentials),
            config.unread_window,
        ));
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            config,
            credentials,
            api,
            directory,
            feed,
            unread,
            normalizer: Mutex::new(None),
            unread_polling: Mutex::new(None),
            events,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &ChatApi {
        &self.api
    }

    pub fn credentials(&self) -> &Arc<CredentialResolver> {
        &self.credentials
    }

    pub fn directory(&self) -> &Arc<DirectoryCache> {
        &self.directory
    }

    pub fn feed(&self) -> &FeedController {
        &self.feed
    }

    pub fn unread(&self) -> &Arc<UnreadAggregator> {
        &self.unread
    }

    /// Adopts a previously persisted sign-in, if there is one.
    pub async fn restore_session(&self) -> ClientResult<bool> {
        let restored = self.credentials.restore().await?;
        if restored {
            self.spawn_directory_preload();
        }
        Ok(restored)
    }

    pub async fn sign_in(&self, credentials: CredentialSet) -> ClientResult<()> {
        self.credentials.sign_in(credentials).await?;
        let active = self.credentials.active().await?;
        self.normalizer.lock().await.take();
        self.emit(ClientEvent::SignedIn {
            email: active.email,
            origin: active.server_url,
        });
        self.spawn_directory_preload();
        Ok(())
    }

    pub async fn sign_out(&self) -> ClientResult<()> {
        self.stop_unread_polling().await;
        self.credentials.sign_out().await?;
        self.normalizer.lock().await.take();
        self.emit(ClientEvent::SignedOut);
        Ok(())
    }

    /// The normalizer for the active server origin, built once per origin.
    pub async fn normalizer(&self) -> ClientResult<Arc<ContentNormalizer>> {
        let origin = self.credentials.active().await?.server_url;
        let mut cached = self.normalizer.lock().await;
        if let Some(normalizer) = cached.as_ref() {
            if normalizer.origin().as_str().trim_end_matches('/') == origin {
                return Ok(Arc::clone(normalizer));
            }
        }
        let normalizer = Arc::new(ContentNormalizer::new(&origin)?);
        *cached = Some(Arc::clone(&normalizer));
        Ok(normalizer)
    }

    pub async fn render(&self, message: &Message) -> ClientResult<String> {
        let normalizer = self.normalizer().await?;
        Ok(normalizer.normalize(
            message.rendered_content.as_deref(),
            message.content.as_deref(),
        ))
    }

    /// The sender of a message as the directory knows them, with an absolute
    /// avatar URL. Falls back to the fields carried by the message itself.
    pub async fn resolve_sender(&self, message: &Message) -> ClientResult<User> {
        let normalizer = self.normalizer().await?;
        let Some(mut sender) = self.directory.lookup(&message.sender_email).await else {
            return Ok(User {
                user_id: message.sender_id,
                full_name: message.display_name().to_string(),
                email: message.sender_email.clone(),
                is_bot: false,
                avatar_url: None,
            });
        };
        sender.avatar_url = self
            .directory
            .avatar_url(&sender.email, &normalizer)
            .await;
        Ok(sender)
    }

    pub async fn select_narrow(&self, narrow: Narrow) -> ClientResult<FeedUpdate> {
        let result = self.feed.set_narrow(narrow).await;
        self.publish_feed(result).await
    }

    pub async fn load_older(&self) -> ClientResult<FeedUpdate> {
        let result = self.feed.load_older().await;
        self.publish_feed(result).await
    }

    pub async fn refresh(&self) -> ClientResult<FeedUpdate> {
        let result = self.feed.refresh().await;
        self.publish_feed(result).await
    }

    pub async fn send(&self, target: &SendTarget, content: &str) -> ClientResult<MessageId> {
        let response = self
            .api
            .send_message(target, content)
            .await
            .inspect_err(|err| self.emit(ClientEvent::Error(err.to_string())))?;
        Ok(response.id)
    }

    /// Starts the background unread poller and forwards its changes as
    /// events. Restarting replaces the previous poller.
    pub async fn start_unread_polling(&self) {
        let poller = self.unread.spawn_polling(self.config.unread_poll_interval);
        let mut counts = poller.subscribe();
        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while counts.changed().await.is_ok() {
                let latest = counts.borrow_and_update().clone();
                let _ = events.send(ClientEvent::UnreadCountsUpdated(latest));
            }
        });
        let previous = self
            .unread_polling
            .lock()
            .await
            .replace(UnreadPolling { poller, forwarder });
        if let Some(previous) = previous {
            previous.forwarder.abort();
        }
        info!(
            every_secs = self.config.unread_poll_interval.as_secs(),
            "client: unread polling started"
        );
    }

    pub async fn stop_unread_polling(&self) {
        if let Some(polling) = self.unread_polling.lock().await.take() {
            polling.poller.stop();
            polling.forwarder.abort();
        }
    }

    pub async fn latest_unread_counts(&self) -> UnreadCounts {
        match self.unread_polling.lock().await.as_ref() {
            Some(polling) => polling.poller.latest(),
            None => self.unread.refresh_counts().await,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn spawn_directory_preload(&self) {
        let directory = Arc::clone(&self.directory);
        tokio::spawn(async move {
            if !directory.preload().await {
                warn!("client: directory preload failed; lookups will retry");
            }
        });
    }

    async fn publish_feed(&self, result: ClientResult<FeedUpdate>) -> ClientResult<FeedUpdate> {
        match result {
            Ok(update) => {
                if update.mutated() {
                    self.emit(ClientEvent::FeedUpdated {
                        narrow: self.feed.narrow().await,
                        update,
                    });
                }
                Ok(update)
            }
            Err(err) => {
                if err.is_user_visible() {
                    self.emit(ClientEvent::Error(err.to_string()));
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ClientHandle for ChatClient {
    async fn sign_in(&self, credentials: CredentialSet) -> Result<()> {
        Ok(ChatClient::sign_in(self, credentials).await?)
    }

    async fn sign_out(&self) -> Result<()> {
        Ok(ChatClient::sign_out(self).await?)
    }

    async fn select_narrow(&self, narrow: Narrow) -> Result<FeedUpdate> {
        Ok(ChatClient::select_narrow(self, narrow).await?)
    }

    async fn load_older(&self) -> Result<FeedUpdate> {
        Ok(ChatClient::load_older(self).await?)
    }

    async fn refresh(&self) -> Result<FeedUpdate> {
        Ok(ChatClient::refresh(self).await?)
    }

    async fn feed_snapshot(&self) -> FeedSnapshot {
        self.feed.snapshot().await
    }

    async fn render(&self, message: &Message) -> Result<String> {
        Ok(ChatClient::render(self, message).await?)
    }

    async fn resolve_sender(&self, message: &Message) -> Result<User> {
        Ok(ChatClient::resolve_sender(self, message).await?)
    }

    async fn send_message(&self, target: &SendTarget, content: &str) -> Result<MessageId> {
        Ok(ChatClient::send(self, target, content).await?)
    }

    async fn unread_counts(&self) -> UnreadCounts {
        ChatClient::latest_unread_counts(self).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        ChatClient::subscribe_events(self)
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
