//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Account server base URL.
    pub server_url: String,
    /// Maximum number of items pushed per request.
    pub request_item_cap: usize,
    /// Page size requested from the server.
    pub response_limit: u32,
    /// Watchdog poll interval.
    pub watchdog_interval: Duration,
    /// Wall-clock threshold after which the slow-sync event fires.
    pub watchdog_threshold: Duration,
    /// Delay between continuation cycles (a yield, not a back-off).
    pub continuation_delay: Duration,
    /// Chunk size for the bulk local load.
    pub load_batch_size: usize,
    /// Touched-item count that triggers the major-data-change event.
    pub major_change_threshold: usize,
}

impl SyncConfig {
    /// Creates a configuration for the given server.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            request_item_cap: 100,
            response_limit: 150,
            watchdog_interval: Duration::from_millis(500),
            watchdog_threshold: Duration::from_secs(5),
            continuation_delay: Duration::from_millis(10),
            load_batch_size: 100,
            major_change_threshold: 10,
        }
    }

    /// Sets the per-request item cap.
    pub fn with_request_item_cap(mut self, cap: usize) -> Self {
        self.request_item_cap = cap;
        self
    }

    /// Sets the response page size.
    pub fn with_response_limit(mut self, limit: u32) -> Self {
        self.response_limit = limit;
        self
    }

    /// Sets the watchdog interval and threshold.
    pub fn with_watchdog(mut self, interval: Duration, threshold: Duration) -> Self {
        self.watchdog_interval = interval;
        self.watchdog_threshold = threshold;
        self
    }

    /// Sets the delay between continuation cycles.
    pub fn with_continuation_delay(mut self, delay: Duration) -> Self {
        self.continuation_delay = delay;
        self
    }

    /// Sets the bulk-load chunk size.
    pub fn with_load_batch_size(mut self, size: usize) -> Self {
        self.load_batch_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = SyncConfig::new("https://sync.example.com")
            .with_request_item_cap(50)
            .with_response_limit(75)
            .with_load_batch_size(10);
        assert_eq!(config.server_url, "https://sync.example.com");
        assert_eq!(config.request_item_cap, 50);
        assert_eq!(config.response_limit, 75);
        assert_eq!(config.load_batch_size, 10);
    }

    #[test]
    fn defaults_match_protocol_expectations() {
        let config = SyncConfig::new("");
        assert_eq!(config.request_item_cap, 100);
        assert_eq!(config.response_limit, 150);
        assert_eq!(config.watchdog_threshold, Duration::from_secs(5));
        assert_eq!(config.major_change_threshold, 10);
    }
}
