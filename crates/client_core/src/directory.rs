use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use shared::protocol::User;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{api::ChatApi, content::ContentNormalizer, error::ClientResult};

/// Where directory entries come from.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn list_users(&self) -> ClientResult<Vec<User>>;
    async fn user_by_email(&self, email: &str) -> ClientResult<User>;
}

#[async_trait]
impl DirectorySource for ChatApi {
    async fn list_users(&self) -> ClientResult<Vec<User>> {
        ChatApi::list_users(self).await
    }

    async fn user_by_email(&self, email: &str) -> ClientResult<User> {
        self.get_user_by_email(email).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkState {
    Empty,
    Loading,
    Populated,
}

type SharedBulkLoad = Shared<BoxFuture<'static, bool>>;
type SharedLookup = Shared<BoxFuture<'static, Option<User>>>;

struct DirectoryState {
    entries: HashMap<String, User>,
    bulk: BulkState,
    bulk_inflight: Option<SharedBulkLoad>,
    inflight: HashMap<String, SharedLookup>,
}

/// Session-lifetime cache of sender identities keyed by email.
///
/// Every load path is coalesced: concurrent callers for the bulk load, or
/// for the same email, await one shared in-flight handle. Failures degrade
/// to a miss and are never cached.
pub struct DirectoryCache {
    source: Arc<dyn DirectorySource>,
    lookup_delay: Duration,
    state: Mutex<DirectoryState>,
}

fn cache_key(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl DirectoryCache {
    pub fn new(source: Arc<dyn DirectorySource>, lookup_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            source,
            lookup_delay,
            state: Mutex::new(DirectoryState {
                entries: HashMap::new(),
                bulk: BulkState::Empty,
                bulk_inflight: None,
                inflight: HashMap::new(),
            }),
        })
    }

    pub async fn bulk_state(&self) -> BulkState {
        self.state.lock().await.bulk
    }

    pub async fn is_populated(&self) -> bool {
        self.bulk_state().await == BulkState::Populated
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn cached(&self, email: &str) -> Option<User> {
        self.state.lock().await.entries.get(&cache_key(email)).cloned()
    }

    pub async fn entries(&self) -> Vec<User> {
        let mut users = self
            .state
            .lock()
            .await
            .entries
            .values()
            .cloned()
            .collect::<Vec<_>>();
        users.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        users
    }

    /// Loads the full directory once. Returns whether the cache is populated.
    pub async fn preload(self: &Arc<Self>) -> bool {
        let load = {
            let mut state = self.state.lock().await;
            if state.bulk == BulkState::Populated {
                return true;
            }
            match &state.bulk_inflight {
                Some(load) => load.clone(),
                None => {
                    let cache = Arc::clone(self);
                    let load = async move { cache.run_bulk_load().await }
                        .boxed()
                        .shared();
                    state.bulk = BulkState::Loading;
                    state.bulk_inflight = Some(load.clone());
                    load
                }
            }
        };
        load.await
    }

    pub async fn lookup(self: &Arc<Self>, email: &str) -> Option<User> {
        let key = cache_key(email);
        if key.is_empty() {
            return None;
        }
        if let Some(user) = self.cached(&key).await {
            return Some(user);
        }
        if !self.is_populated().await {
            self.preload().await;
            if let Some(user) = self.cached(&key).await {
                return Some(user);
            }
        }
        self.lookup_individual(key).await
    }

    pub async fn avatar_url(
        self: &Arc<Self>,
        email: &str,
        normalizer: &ContentNormalizer,
    ) -> Option<String> {
        let user = self.lookup(email).await?;
        let avatar = user.avatar_url.filter(|url| !url.trim().is_empty())?;
        Some(normalizer.resolve_asset_url(&avatar))
    }

    async fn lookup_individual(self: &Arc<Self>, key: String) -> Option<User> {
        let lookup = {
            let mut state = self.state.lock().await;
            if let Some(user) = state.entries.get(&key) {
                return Some(user.clone());
            }
            match state.inflight.get(&key) {
                Some(lookup) => {
                    debug!(email = %key, "directory: joining in-flight lookup");
                    lookup.clone()
                }
                None => {
                    let cache = Arc::clone(self);
                    let email = key.clone();
                    let lookup = async move { cache.run_individual_lookup(email).await }
                        .boxed()
                        .shared();
                    state.inflight.insert(key, lookup.clone());
                    lookup
                }
            }
        };
        lookup.await
    }

    async fn run_bulk_load(&self) -> bool {
        let result = self.source.list_users().await;
        let mut state = self.state.lock().await;
        state.bulk_inflight = None;
        match result {
            Ok(users) => {
                for user in users {
                    state.entries.insert(cache_key(&user.email), user);
                }
                state.bulk = BulkState::Populated;
                info!(entries = state.entries.len(), "directory: bulk load complete");
                true
            }
            Err(err) => {
                state.bulk = BulkState::Empty;
                warn!("directory: bulk load failed: {err}");
                false
            }
        }
    }

    async fn run_individual_lookup(&self, key: String) -> Option<User> {
        // Spreads bursts of distinct lookups across the gateway throttle.
        tokio::time::sleep(self.lookup_delay).await;
        let result = self.source.user_by_email(&key).await;
        let mut state = self.state.lock().await;
        state.inflight.remove(&key);
        match result {
            Ok(user) => {
                state.entries.insert(key, user.clone());
                Some(user)
            }
            Err(err) => {
                warn!(email = %key, "directory: lookup failed: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/directory_tests.rs"]
mod tests;
