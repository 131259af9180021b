//! Centralized Constants
//!
//! Single source of truth for the timing envelopes and recovery limits used
//! throughout the control core.
//!
//! # Organization
//!
//! - **Framing**: TCSI packet layout limits
//! - **Timing**: per-packet timeouts and the busy back-off envelope
//! - **Recovery**: error-window and liveness thresholds
//! - **Flash**: sector geometry
//!
//! Wire-format byte positions and command/status codes live next to the
//! codec in [`crate::protocol::packet`].

use std::time::Duration;

// =============================================================================
// Framing
// =============================================================================

/// TCSI header size: 1B sync/id + 1B status-or-command + 4B address + 1B count
pub const HEADER_SIZE: usize = 7;

/// Smallest well-formed frame: header plus the trailing checksum byte
pub const MINIMUM_PACKET_SIZE: usize = HEADER_SIZE + 1;

/// Payload count is a single byte
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

// =============================================================================
// Timing
// =============================================================================

/// Per-packet timeout for register and SRAM traffic
pub const TIMEOUT_DEFAULT: Duration = Duration::from_millis(1_000);

/// Per-packet timeout for any flash-burst traffic (erase cycles are slow)
pub const TIMEOUT_WRITING_FLASH: Duration = Duration::from_millis(5_000);

/// Pause between retries while the device reports it is busy
pub const BUSY_DEVICE_DELAY: Duration = Duration::from_millis(500);

/// Total busy back-off budget before the operation is abandoned
pub const BUSY_DEVICE_TIMEOUT: Duration = Duration::from_millis(10_000);

// =============================================================================
// Recovery
// =============================================================================

/// Width of the sliding window of recent packet outcomes
pub const ERROR_WINDOW_SIZE: usize = 8;

/// Failed attempts tolerated within [`ERROR_WINDOW_SIZE`] before giving up
pub const MAX_ERRORS_IN_WINDOW: usize = 4;

/// Consecutive empty reads tolerated before the connection counts as lost
pub const MAX_STRAIGHT_NO_RESPONSES: usize = 2;

/// Bounded length of each per-category error log kept in the stats
pub const MAX_LOGGED_ERRORS: usize = 200;

// =============================================================================
// Flash
// =============================================================================

/// Flash sector size; a burst envelope must not cross a sector boundary
pub const FLASH_BYTES_PER_SECTOR: u32 = 65_536;
