//! Device parameter catalog
//!
//! Named non-volatile parameters the device exposes through `GET`/`SET`,
//! with the value rules the firmware enforces.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Rejected parameter values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    /// Serial number is not 12 alphanumeric characters
    #[error("{param} must be 12 alphanumeric characters, got {value:?}")]
    BadSerialNumber {
        /// Parameter being set
        param: Parameter,
        /// Rejected value
        value: String,
    },

    /// Value is not an integer in the allowed range
    #[error("{param} must be an integer in {min}..={max}, got {value:?}")]
    OutOfRange {
        /// Parameter being set
        param: Parameter,
        /// Rejected value
        value: String,
        /// Smallest accepted value
        min: i64,
        /// Largest accepted value
        max: i64,
    },

    /// Name not in the catalog
    #[error("Unknown parameter: {0}")]
    Unknown(String),
}

/// A named device parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parameter {
    /// Factory serial number
    SerialNumber,
    /// LED drive strength
    LedDrive,
}

impl Parameter {
    /// All known parameters
    pub const ALL: [Parameter; 2] = [Parameter::SerialNumber, Parameter::LedDrive];

    /// Wire name used in `GET`/`SET` commands
    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::SerialNumber => "SER_NUMBER",
            Parameter::LedDrive => "LED_DRIVE",
        }
    }

    /// Index of the parameter in the device's parameter table
    pub fn index(&self) -> u8 {
        match self {
            Parameter::SerialNumber => 0,
            Parameter::LedDrive => 9,
        }
    }

    /// Check a value before it is sent to the device
    pub fn validate(&self, value: &str) -> Result<(), ParameterError> {
        match self {
            Parameter::SerialNumber => {
                if serial_number_pattern().is_match(value) {
                    Ok(())
                } else {
                    Err(ParameterError::BadSerialNumber {
                        param: *self,
                        value: value.to_string(),
                    })
                }
            }
            // Digits only: the value goes on the wire exactly as given
            Parameter::LedDrive => match value.parse::<u16>() {
                Ok(v) if v <= 255 && value.bytes().all(|b| b.is_ascii_digit()) => Ok(()),
                _ => Err(ParameterError::OutOfRange {
                    param: *self,
                    value: value.to_string(),
                    min: 0,
                    max: 255,
                }),
            },
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parameter {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parameter::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParameterError::Unknown(s.to_string()))
    }
}

fn serial_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9A-Za-z]{12}$").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(Parameter::SerialNumber.as_str(), "SER_NUMBER");
        assert_eq!(Parameter::LedDrive.as_str(), "LED_DRIVE");
        assert_eq!(Parameter::SerialNumber.index(), 0);
        assert_eq!(Parameter::LedDrive.index(), 9);
    }

    #[test]
    fn test_serial_number_validation() {
        assert!(Parameter::SerialNumber.validate("A1B2C3D4E5F6").is_ok());
        assert!(Parameter::SerialNumber.validate("A1B2C3D4E5F").is_err());
        assert!(Parameter::SerialNumber.validate("A1B2C3D4E5F67").is_err());
        assert!(Parameter::SerialNumber.validate("A1B2-3D4E5F6").is_err());
    }

    #[test]
    fn test_led_drive_validation() {
        assert!(Parameter::LedDrive.validate("0").is_ok());
        assert!(Parameter::LedDrive.validate("255").is_ok());
        assert!(Parameter::LedDrive.validate("256").is_err());
        assert!(Parameter::LedDrive.validate("-1").is_err());
        assert!(Parameter::LedDrive.validate(" 128").is_err());
        assert!(Parameter::LedDrive.validate("128 ").is_err());
        assert!(Parameter::LedDrive.validate("+128").is_err());
        // Non-numeric input is rejected rather than panicking
        assert!(matches!(
            Parameter::LedDrive.validate("bright"),
            Err(ParameterError::OutOfRange { min: 0, max: 255, .. })
        ));
    }

    #[test]
    fn test_from_str() {
        assert_eq!("ser_number".parse::<Parameter>().unwrap(), Parameter::SerialNumber);
        assert_eq!("LED_DRIVE".parse::<Parameter>().unwrap(), Parameter::LedDrive);
        assert!("FOO".parse::<Parameter>().is_err());
    }
}
