//! Candidate port filtering.
//!
//! The host enumeration includes ports that accept an open but can never be
//! control panels: Bluetooth virtual ports, vendor debug consoles, audio/tone
//! ports. Handshaking against one wastes a full timeout per scan, so they are
//! filtered out up front by name, case-insensitively.

use simpanel_core::{PortId, constants::IGNORED_PORT_PATTERNS};

/// Returns `true` if the port name matches a known non-panel pattern.
///
/// Matching is case-insensitive substring matching, since hosts disagree on
/// casing (`Bluetooth-Incoming-Port` vs `BLTH`-era lowercase names).
///
/// # Examples
///
/// ```
/// use simpanel_ports::is_ignored_port;
///
/// assert!(is_ignored_port("/dev/cu.Bluetooth-Incoming-Port"));
/// assert!(is_ignored_port("/dev/cu.debug-console"));
/// assert!(!is_ignored_port("/dev/cu.usbmodem14201"));
/// ```
#[must_use]
pub fn is_ignored_port(name: &str) -> bool {
    let lowered = name.to_lowercase();
    IGNORED_PORT_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Drop ports that should never be treated as panel candidates.
///
/// Pure filter over the host's raw list; performs no I/O of its own.
#[must_use]
pub fn filter_candidate_ports(ports: Vec<PortId>) -> Vec<PortId> {
    ports
        .into_iter()
        .filter(|port| !is_ignored_port(port.as_str()))
        .collect()
}
