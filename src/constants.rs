//! Application-wide constants for boxctl.
//!
//! Magic numbers for the control channel live here, grouped by concern.
//!
//! # Categories
//!
//! - **Connect**: attempt count and backoff for establishing a session
//! - **Telemetry**: push cadence and history sizes
//! - **Logs**: batching delay and visible line cap

use std::time::Duration;

// ============================================================================
// Connect
// ============================================================================

/// Connect attempts before a session gives up and settles disconnected.
pub const CONNECT_MAX_ATTEMPTS: u32 = 10;

/// Delay before the first connect attempt.
pub const CONNECT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Added to the delay for each subsequent attempt.
///
/// Attempt `i` (0-indexed) waits `CONNECT_BASE_DELAY + i * CONNECT_DELAY_STEP`,
/// so the delays run 100, 150, ..., 550 ms.
pub const CONNECT_DELAY_STEP: Duration = Duration::from_millis(50);

/// Delay before connect attempt `attempt` (0-indexed).
#[must_use]
pub fn connect_delay(attempt: u32) -> Duration {
    CONNECT_BASE_DELAY + CONNECT_DELAY_STEP * attempt
}

// ============================================================================
// Telemetry
// ============================================================================

/// Default status push interval requested from the engine.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Samples kept in the uplink/downlink rate history.
pub const TRAFFIC_HISTORY_LEN: usize = 30;

// ============================================================================
// Logs
// ============================================================================

/// Trailing debounce before pending log lines become visible.
pub const LOG_FLUSH_DELAY: Duration = Duration::from_millis(100);

/// Default cap on visible log lines.
pub const DEFAULT_LOG_CAP_LINES: usize = 300;
