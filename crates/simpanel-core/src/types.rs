use crate::{Result, constants::MAX_VERSION_LENGTH, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Host serial port identifier (e.g. `/dev/cu.usbmodem14201`, `COM7`).
///
/// Port ids come from the host enumeration and are used as the key of the
/// connection registry. They are normalized by trimming surrounding
/// whitespace; an empty id is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(String);

impl PortId {
    /// Create a new port id with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidPortId` if the id is empty after trimming.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(Error::InvalidPortId("empty port id".to_string()));
        }
        Ok(PortId(id.to_string()))
    }

    /// Get the port id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PortId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PortId::new(s)
    }
}

/// Firmware version string reported by a device (bounded-length ASCII).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirmwareVersion(String);

impl FirmwareVersion {
    /// Create a new firmware version with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidVersion` if:
    /// - The string is empty
    /// - The string exceeds [`MAX_VERSION_LENGTH`] bytes
    /// - The string contains non-ASCII characters
    pub fn new(version: &str) -> Result<Self> {
        if version.is_empty() {
            return Err(Error::InvalidVersion("empty version".to_string()));
        }
        if version.len() > MAX_VERSION_LENGTH {
            return Err(Error::InvalidVersion(format!(
                "version must be at most {MAX_VERSION_LENGTH} bytes, got {}",
                version.len()
            )));
        }
        if !version.is_ascii() {
            return Err(Error::InvalidVersion("version must be ASCII".to_string()));
        }
        Ok(FirmwareVersion(version.to_string()))
    }

    /// Get the version as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for FirmwareVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FirmwareVersion::new(s)
    }
}

/// Kind of a configured panel input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Continuous analog input (lever, throttle, brake handle).
    Axis = 0,
    /// Momentary or latching switch.
    Button = 1,
}

impl InputKind {
    /// Create an input kind from its wire code.
    ///
    /// # Errors
    /// Returns `Error::InvalidInputKind` if the code is not 0 or 1.
    #[inline]
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(InputKind::Axis),
            1 => Ok(InputKind::Button),
            _ => Err(Error::InvalidInputKind(value)),
        }
    }

    /// Convert the input kind to its wire code.
    #[inline]
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InputKind::Axis => write!(f, "Axis"),
            InputKind::Button => write!(f, "Button"),
        }
    }
}

/// One input entry of a device configuration: which firmware pin it reads and
/// how the firmware should treat it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    pub pin: u8,
    pub kind: InputKind,
}

impl InputConfig {
    #[must_use]
    pub fn new(pin: u8, kind: InputKind) -> Self {
        Self { pin, kind }
    }
}

/// A live raw reading streamed by a connected device, fanned out to
/// calibration sessions and UI subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputReading {
    pub port: PortId,
    pub pin: u8,
    pub value: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/dev/cu.usbmodem14201")]
    #[case("COM7")]
    #[case("  COM7  ")]
    fn test_port_id_valid(#[case] input: &str) {
        let port = PortId::new(input).unwrap();
        assert_eq!(port.as_str(), input.trim());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn test_port_id_invalid(#[case] input: &str) {
        assert!(PortId::new(input).is_err());
    }

    #[test]
    fn test_firmware_version_valid() {
        let version = FirmwareVersion::new("1.4.2-rc1").unwrap();
        assert_eq!(version.as_str(), "1.4.2-rc1");
        assert_eq!(version.to_string(), "1.4.2-rc1");
    }

    #[rstest]
    #[case("")]
    #[case("123456789012345678901234567890123")] // 33 bytes
    #[case("vers\u{e3}o")] // non-ASCII
    fn test_firmware_version_invalid(#[case] input: &str) {
        assert!(FirmwareVersion::new(input).is_err());
    }

    #[test]
    fn test_input_kind_codes() {
        assert_eq!(InputKind::from_u8(0).unwrap(), InputKind::Axis);
        assert_eq!(InputKind::from_u8(1).unwrap(), InputKind::Button);
        assert!(InputKind::from_u8(2).is_err());

        assert_eq!(InputKind::Axis.to_u8(), 0);
        assert_eq!(InputKind::Button.to_u8(), 1);
    }

    #[test]
    fn test_input_reading_serde() {
        let reading = InputReading {
            port: PortId::new("COM3").unwrap(),
            pin: 4,
            value: 512,
        };
        let json = serde_json::to_string(&reading).unwrap();
        let back: InputReading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }
}
