use std::time::Duration;

/// Delay before the first reconnect attempt after an unexpected drop.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Upper bound for the exponential reconnect delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Reconnect attempts before the connection gives up and waits for a manual retry.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// A `stopTyping` signal is emitted this long after typing starts.
pub const TYPING_WINDOW: Duration = Duration::from_millis(1000);

/// Maximum timestamp distance for the content-based reconcile fallback.
pub const RECONCILE_WINDOW: Duration = Duration::from_millis(1000);

/// Prefix of client-generated temporary message ids.
pub const TEMPORARY_ID_PREFIX: &str = "tmp-";

/// Capacity of the command and event channels of a live connection.
pub const CHANNEL_CAPACITY: usize = 256;

/// Default REST API base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Default live socket URL.
pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:5000/ws";

/// Text of the transient notice shown when a send is rolled back.
pub const SEND_FAILED_NOTICE: &str = "Sending failed";
