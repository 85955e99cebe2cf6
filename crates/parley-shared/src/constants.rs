use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Parley";

/// Interval between heartbeat frames on a live connection
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// First reconnect delay after an unintentional disconnect
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the exponential reconnect delay
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Reconnect attempts before giving up with a terminal failure
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Safety timeout after which a typing indicator is dropped even if the
/// stop event never arrives
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(5);

/// Cached messages older than this are discarded at load time
pub const CACHE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Trailing debounce for cache writes
pub const CACHE_WRITE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Trailing debounce for read receipts
pub const MARK_READ_DEBOUNCE: Duration = Duration::from_secs(5);

/// Delay before the single read-receipt retry
pub const MARK_READ_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Messages fetched per page / full refresh
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// On-disk cache schema version; any mismatch discards the cache wholesale
pub const CACHE_SCHEMA_VERSION: &str = "3";
