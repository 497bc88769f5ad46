// Stream constants (No magic values)
use std::time::Duration;

/// Heartbeat frame interval for live sessions (15s)
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Count polling interval for polling sessions (1s)
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Event name of heartbeat frames
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Event name of polling delta frames
pub const COUNTS_EVENT: &str = "counts";
