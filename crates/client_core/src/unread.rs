use std::{collections::HashMap, sync::Arc, time::Duration};

use shared::{
    domain::{Narrow, StreamId},
    protocol::{Anchor, Message, MessageKind},
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{api::FetchOptions, credentials::CredentialResolver, feed::MessageSource};

const READ_FLAG: &str = "read";

/// Unread badge counts derived from the most recent messages.
///
/// This is a heuristic: only the newest window of messages is inspected,
/// so older unread traffic is not counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadCounts {
    pub per_stream: HashMap<StreamId, u32>,
    pub per_sender: HashMap<String, u32>,
}

impl UnreadCounts {
    pub fn from_messages(messages: &[Message], self_email: Option<&str>) -> Self {
        let mut counts = Self::default();
        for message in messages {
            if message.has_flag(READ_FLAG) {
                continue;
            }
            if self_email.is_some_and(|me| me.eq_ignore_ascii_case(&message.sender_email)) {
                continue;
            }
            match message.kind {
                MessageKind::Stream => {
                    if let Some(stream_id) = message.stream_id {
                        *counts.per_stream.entry(stream_id).or_default() += 1;
                    }
                }
                MessageKind::Private => {
                    *counts
                        .per_sender
                        .entry(message.sender_email.clone())
                        .or_default() += 1;
                }
            }
        }
        counts
    }

    pub fn stream(&self, stream_id: StreamId) -> u32 {
        self.per_stream.get(&stream_id).copied().unwrap_or_default()
    }

    pub fn sender(&self, email: &str) -> u32 {
        self.per_sender.get(email).copied().unwrap_or_default()
    }

    pub fn total(&self) -> u32 {
        self.per_stream.values().sum::<u32>() + self.per_sender.values().sum::<u32>()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

pub struct UnreadAggregator {
    source: Arc<dyn MessageSource>,
    credentials: Arc<CredentialResolver>,
    window: u32,
}

impl UnreadAggregator {
    pub fn new(
        source: Arc<dyn MessageSource>,
        credentials: Arc<CredentialResolver>,
        window: u32,
    ) -> Self {
        Self {
            source,
            credentials,
            window,
        }
    }

    /// Recomputes the counts. Failures yield empty counts rather than an
    /// error, since the badges are advisory.
    pub async fn refresh_counts(&self) -> UnreadCounts {
        let self_email = self.credentials.active().await.ok().map(|creds| creds.email);
        let options = FetchOptions {
            anchor: Anchor::Newest,
            before: self.window,
            after: 0,
            apply_markdown: false,
        };
        match self.source.fetch_page(&Narrow::all(), options).await {
            Ok(messages) => {
                let counts = UnreadCounts::from_messages(&messages, self_email.as_deref());
                debug!(total = counts.total(), "unread: counts refreshed");
                counts
            }
            Err(err) => {
                warn!("unread: failed to refresh counts: {err}");
                UnreadCounts::default()
            }
        }
    }

    /// Recomputes the counts on a fixed cadence until the poller is dropped.
    pub fn spawn_polling(self: &Arc<Self>, every: Duration) -> UnreadPoller {
        let (tx, rx) = watch::channel(UnreadCounts::default());
        let aggregator = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let counts = aggregator.refresh_counts().await;
                tx.send_if_modified(|current| {
                    if *current == counts {
                        return false;
                    }
                    *current = counts;
                    true
                });
                if tx.is_closed() {
                    break;
                }
            }
        });
        UnreadPoller { counts: rx, task }
    }
}

pub struct UnreadPoller {
    counts: watch::Receiver<UnreadCounts>,
    task: JoinHandle<()>,
}

impl UnreadPoller {
    pub fn subscribe(&self) -> watch::Receiver<UnreadCounts> {
        self.counts.clone()
    }

    pub fn latest(&self) -> UnreadCounts {
        self.counts.borrow().clone()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for UnreadPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
#[path = "tests/unread_tests.rs"]
mod tests;
