//! Shared constants for the control-panel connection and calibration engines.
//!
//! These values are the reference configuration for protocol timing, reconnect
//! policy, and calibration sampling. Sessions and the registry accept overrides
//! through their config structs; the constants here are the defaults every
//! production deployment runs with.
//!
//! # Timing Overview
//!
//! | Constant | Value | Applies to |
//! |----------|-------|------------|
//! | [`HANDSHAKE_READ_TIMEOUT_MS`] | 1 000 ms | identity response read |
//! | [`CONFIG_ACK_TIMEOUT_MS`] | 5 000 ms | configuration store/reject ack |
//! | [`RECONNECT_BACKOFF_MS`] | 30 000 ms | failed-port rescan gate |
//! | [`UPLOAD_TIMEOUT_MS`] | 120 000 ms | full firmware upload |

// ============================================================================
// Handshake
// ============================================================================

/// Read timeout for the identity handshake (milliseconds).
///
/// A device that does not answer the identity request within this window is
/// treated as absent. A timeout here fails the handshake immediately; it is
/// never retried.
pub const HANDSHAKE_READ_TIMEOUT_MS: u64 = 1_000;

/// Maximum number of decoded-but-wrong-type messages tolerated during the
/// handshake before giving up.
///
/// A device may emit a stray heartbeat or a buffered input value before its
/// identity response. Each such message consumes one attempt; exhausting all
/// attempts yields a `no_valid_response` failure, which is distinct from a
/// read timeout.
pub const HANDSHAKE_READ_ATTEMPTS: u32 = 3;

// ============================================================================
// Connected operation
// ============================================================================

/// Bound on waiting for a configuration store/reject acknowledgement
/// (milliseconds). Expiry is reported as a timeout failure, never dropped.
pub const CONFIG_ACK_TIMEOUT_MS: u64 = 5_000;

/// Per-iteration read timeout of the connected read loop (milliseconds).
///
/// While connected, a read returning no bytes within this window is benign;
/// the loop simply checks for pending commands and reads again.
pub const CONNECTED_READ_POLL_MS: u64 = 250;

// ============================================================================
// Reconnect policy
// ============================================================================

/// Minimum wait before a failed port becomes eligible for rescan
/// (milliseconds).
///
/// Prevents hot-looping a handshake against a device stuck in a bad state.
/// The registry silently skips backed-off ports; backoff is bookkeeping, not
/// a user-visible error.
pub const RECONNECT_BACKOFF_MS: u64 = 30_000;

// ============================================================================
// Firmware upload
// ============================================================================

/// Hard bound on a full firmware upload (milliseconds). Expiry cancels the
/// upload and always releases the port lease.
pub const UPLOAD_TIMEOUT_MS: u64 = 120_000;

// ============================================================================
// Calibration sampling
// ============================================================================

/// Minimum samples required to advance out of a min/max collection step.
pub const MIN_STEP_SAMPLES: usize = 10;

/// Minimum count of distinct values required in a min/max collection step.
///
/// A pin stuck at one value (disconnected sensor, dead channel) produces many
/// samples but no spread; requiring distinct values catches that before the
/// calculator runs.
pub const MIN_DISTINCT_STEP_VALUES: usize = 3;

/// Minimum samples required to advance out of the sweep step.
pub const MIN_SWEEP_SAMPLES: usize = 10;

/// Minimum samples required to complete a notch capture.
pub const MIN_NOTCH_SAMPLES: usize = 10;

/// Divisor applied to the hardware ceiling to derive the maximum tolerated
/// sample spread in a min/max collection step.
///
/// With a 10-bit sensor this allows a spread of 127 counts; a lever held at
/// an endpoint jitters far less than that, while a lever still being moved
/// exceeds it and is rejected as an unstable value.
pub const STABILITY_SPREAD_DIVISOR: u16 = 8;

// ============================================================================
// Hardware
// ============================================================================

/// Default raw ceiling of the analog sensors (10-bit ADC).
pub const DEFAULT_MAX_HARDWARE_VALUE: u16 = 1023;

/// Maximum length of the firmware version string carried in an identity
/// response (bytes, ASCII).
pub const MAX_VERSION_LENGTH: usize = 32;

/// Default baud rate for panel serial links.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

// ============================================================================
// Port filtering
// ============================================================================

/// Case-insensitive name fragments identifying host serial ports that can
/// never be control panels.
///
/// Bluetooth virtual ports, vendor debug consoles, and audio/tone ports
/// accept an open but will never answer an identity request; attempting a
/// handshake against them wastes a full timeout per scan.
pub const IGNORED_PORT_PATTERNS: &[&str] = &["bluetooth", "debug-console", "wlan-debug", "tone"];
