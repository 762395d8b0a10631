//! The message feed for the selected narrow.
//!
//! One controller owns the loaded window. Every fetch is tagged with the
//! generation it was issued under; selecting a new narrow bumps the
//! generation, so a completion that arrives for an older context is
//! discarded instead of mixed in.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use shared::{
    domain::{MessageId, Narrow},
    protocol::{Anchor, Message},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    api::{ChatApi, FetchOptions},
    error::{ClientError, ClientResult},
};

#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch_page(&self, narrow: &Narrow, options: FetchOptions) -> ClientResult<Vec<Message>>;
}

#[async_trait]
impl MessageSource for ChatApi {
    async fn fetch_page(&self, narrow: &Narrow, options: FetchOptions) -> ClientResult<Vec<Message>> {
        self.fetch_messages(narrow, options).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    Idle,
    LoadingInitial,
    Ready,
    LoadingOlder,
    Refreshing,
}

/// What a feed operation did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedUpdate {
    /// The window was replaced by the newest page.
    Replaced { context_changed: bool, count: usize },
    /// Older messages were merged in front of the window.
    Prepended { count: usize },
    /// Nothing to do in the current phase.
    Unchanged,
    /// The result arrived for a narrow that is no longer selected.
    Superseded,
}

impl FeedUpdate {
    pub fn mutated(&self) -> bool {
        matches!(self, Self::Replaced { .. } | Self::Prepended { .. })
    }
}

/// Loaded messages, ascending by id with no duplicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedWindow {
    messages: Vec<Message>,
    oldest_id: Option<MessageId>,
}

impl FeedWindow {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn oldest_id(&self) -> Option<MessageId> {
        self.oldest_id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn clear(&mut self) {
        self.messages.clear();
        self.oldest_id = None;
    }

    fn replace(&mut self, page: Vec<Message>) -> usize {
        self.messages = page;
        self.normalize();
        self.messages.len()
    }

    /// Merges a page fetched with `cursor` as anchor. The anchor message
    /// itself comes back in the page and is filtered out here.
    fn prepend_older(&mut self, page: Vec<Message>, cursor: MessageId) -> usize {
        let known = self
            .messages
            .iter()
            .map(|message| message.id)
            .collect::<HashSet<_>>();
        let mut older = page
            .into_iter()
            .filter(|message| message.id < cursor && !known.contains(&message.id))
            .collect::<Vec<_>>();
        let added = older.len();
        if added > 0 {
            older.append(&mut self.messages);
            self.messages = older;
            self.normalize();
        }
        added
    }

    fn normalize(&mut self) {
        self.messages.sort_by_key(|message| message.id);
        self.messages.dedup_by_key(|message| message.id);
        self.oldest_id = self.messages.first().map(|message| message.id);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub narrow: Option<Narrow>,
    pub phase: FeedPhase,
    pub messages: Vec<Message>,
    pub oldest_id: Option<MessageId>,
}

struct FeedState {
    narrow: Option<Narrow>,
    window: FeedWindow,
    phase: FeedPhase,
    generation: u64,
    /// A narrow change not yet reported through a `Replaced` update.
    context_pending: bool,
}

pub struct FeedController {
    source: Arc<dyn MessageSource>,
    page_size: u32,
    state: Mutex<FeedState>,
}

impl FeedController {
    pub fn new(source: Arc<dyn MessageSource>, page_size: u32) -> Self {
        Self {
            source,
            page_size,
            state: Mutex::new(FeedState {
                narrow: None,
                window: FeedWindow::default(),
                phase: FeedPhase::Idle,
                generation: 0,
                context_pending: false,
            }),
        }
    }

    pub async fn phase(&self) -> FeedPhase {
        self.state.lock().await.phase
    }

    pub async fn narrow(&self) -> Option<Narrow> {
        self.state.lock().await.narrow.clone()
    }

    pub async fn snapshot(&self) -> FeedSnapshot {
        let state = self.state.lock().await;
        FeedSnapshot {
            narrow: state.narrow.clone(),
            phase: state.phase,
            messages: state.window.messages().to_vec(),
            oldest_id: state.window.oldest_id(),
        }
    }

    /// Selects a narrow and loads its newest page. Selecting a different
    /// narrow clears the window before the fetch starts; selecting the
    /// current one reloads it in place.
    pub async fn set_narrow(&self, narrow: Narrow) -> ClientResult<FeedUpdate> {
        let (generation, context_changed, fallback) = {
            let mut state = self.state.lock().await;
            let context_changed = state.narrow.as_ref() != Some(&narrow);
            let fallback = if context_changed {
                state.window.clear();
                state.narrow = Some(narrow.clone());
                state.context_pending = true;
                state.phase = FeedPhase::LoadingInitial;
                FeedPhase::Idle
            } else if state.window.is_empty() {
                state.phase = FeedPhase::LoadingInitial;
                FeedPhase::Idle
            } else {
                state.phase = FeedPhase::Refreshing;
                FeedPhase::Ready
            };
            state.generation += 1;
            (state.generation, context_changed, fallback)
        };
        info!(%narrow, generation, context_changed, "feed: loading newest page");
        settle(self.load_newest(&narrow, generation, fallback).await)
    }

    /// Extends the window backwards by one page. A no-op unless the feed is
    /// `Ready` with a known oldest message, so overlapping calls issue a
    /// single fetch.
    pub async fn load_older(&self) -> ClientResult<FeedUpdate> {
        let (narrow, cursor, generation) = {
            let mut state = self.state.lock().await;
            if state.phase != FeedPhase::Ready {
                return Ok(FeedUpdate::Unchanged);
            }
            let (Some(narrow), Some(cursor)) = (state.narrow.clone(), state.window.oldest_id())
            else {
                return Ok(FeedUpdate::Unchanged);
            };
            state.phase = FeedPhase::LoadingOlder;
            (narrow, cursor, state.generation)
        };

        debug!(%narrow, cursor = cursor.0, "feed: loading older page");
        let options = FetchOptions {
            anchor: Anchor::Id(cursor),
            before: self.page_size,
            after: 0,
            apply_markdown: true,
        };
        let result = self.source.fetch_page(&narrow, options).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(cursor = cursor.0, "feed: discarding older page for replaced narrow");
            return Ok(FeedUpdate::Superseded);
        }
        state.phase = FeedPhase::Ready;
        let page = result.inspect_err(|err| warn!("feed: older page failed: {err}"))?;
        let count = state.window.prepend_older(page, cursor);
        Ok(FeedUpdate::Prepended { count })
    }

    /// Reloads the newest page of the current narrow, replacing the window.
    pub async fn refresh(&self) -> ClientResult<FeedUpdate> {
        let (narrow, generation) = {
            let mut state = self.state.lock().await;
            if state.phase != FeedPhase::Ready {
                return Ok(FeedUpdate::Unchanged);
            }
            let Some(narrow) = state.narrow.clone() else {
                return Ok(FeedUpdate::Unchanged);
            };
            state.phase = FeedPhase::Refreshing;
            state.generation += 1;
            (narrow, state.generation)
        };
        settle(
            self.load_newest(&narrow, generation, FeedPhase::Ready)
                .await,
        )
    }

    /// Client-side filter over the loaded window only.
    pub async fn filter_loaded(&self, query: &str) -> Vec<Message> {
        let needle = query.trim().to_lowercase();
        let state = self.state.lock().await;
        if needle.is_empty() {
            return state.window.messages().to_vec();
        }
        state
            .window
            .messages()
            .iter()
            .filter(|message| matches_query(message, &needle))
            .cloned()
            .collect()
    }

    async fn load_newest(
        &self,
        narrow: &Narrow,
        generation: u64,
        fallback: FeedPhase,
    ) -> ClientResult<FeedUpdate> {
        let result = self
            .source
            .fetch_page(narrow, FetchOptions::newest(self.page_size))
            .await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            return Err(ClientError::StaleResult);
        }
        match result {
            Ok(page) => {
                let count = state.window.replace(page);
                state.phase = FeedPhase::Ready;
                let context_changed = std::mem::take(&mut state.context_pending);
                Ok(FeedUpdate::Replaced {
                    context_changed,
                    count,
                })
            }
            Err(err) => {
                state.phase = fallback;
                warn!(%narrow, "feed: newest page failed: {err}");
                Err(err)
            }
        }
    }
}

fn settle(result: ClientResult<FeedUpdate>) -> ClientResult<FeedUpdate> {
    match result {
        Err(ClientError::StaleResult) => {
            debug!("feed: discarding result for replaced narrow");
            Ok(FeedUpdate::Superseded)
        }
        other => other,
    }
}

fn matches_query(message: &Message, needle: &str) -> bool {
    let fields = [
        message.content.as_deref(),
        message.rendered_content.as_deref(),
        Some(message.sender_full_name.as_str()),
        message.topic_label(),
    ];
    fields
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(needle))
}

#[cfg(test)]
#[path = "tests/feed_tests.rs"]
mod tests;
