use std::time::Duration;

pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(200);
pub const FEED_PAGE_SIZE: u32 = 50;
pub const DIRECTORY_LOOKUP_DELAY: Duration = Duration::from_millis(100);
pub const MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;
pub const UNREAD_WINDOW: u32 = 100;
pub const UNREAD_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_TOPIC: &str = "(no topic)";

/// Tuning knobs for the client core. `Default` matches the production
/// cadence of the remote API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub min_request_interval: Duration,
    pub page_size: u32,
    pub directory_lookup_delay: Duration,
    pub max_upload_bytes: u64,
    pub unread_window: u32,
    pub unread_poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            min_request_interval: MIN_REQUEST_INTERVAL,
            page_size: FEED_PAGE_SIZE,
            directory_lookup_delay: DIRECTORY_LOOKUP_DELAY,
            max_upload_bytes: MAX_UPLOAD_BYTES,
            unread_window: UNREAD_WINDOW,
            unread_poll_interval: UNREAD_POLL_INTERVAL,
        }
    }
}
