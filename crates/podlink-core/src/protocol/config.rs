//! Session and serial link configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{ChecksumMode, ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, MAX_LINE_LEN};

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    /// 7 data bits
    Seven,
    /// 8 data bits
    Eight,
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity bit
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Number of stop bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// 1 stop bit
    One,
    /// 2 stop bits
    Two,
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    /// No flow control
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// Serial port settings. Defaults are 115200 baud, 8N1, no flow control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Line speed in bits per second
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits per character
    pub stop_bits: StopBits,
    /// Flow control mode
    pub flow_control: FlowControl,
    /// Inbound lines longer than this are dropped and reported as a transport fault
    pub max_line_len: usize,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            max_line_len: MAX_LINE_LEN,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Response timeout in milliseconds, unless a command overrides it
    pub timeout_ms: u64,
    /// What response checksums are computed over
    pub checksum: ChecksumMode,
    /// Serial link settings, used by [`DeviceSession::open`](super::DeviceSession::open)
    pub serial: SerialSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            checksum: ChecksumMode::Raw,
            serial: SerialSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let config: SessionConfig =
            serde_json::from_str(json).map_err(|e| ProtocolError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ProtocolError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String, ProtocolError> {
        serde_json::to_string_pretty(self).map_err(|e| ProtocolError::Config(e.to_string()))
    }

    /// Default response timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn check(&self) -> Result<(), ProtocolError> {
        if self.timeout_ms == 0 {
            return Err(ProtocolError::Config("timeout_ms must be greater than 0".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(ProtocolError::Config("baud_rate must be greater than 0".into()));
        }
        if self.serial.max_line_len == 0 {
            return Err(ProtocolError::Config("max_line_len must be greater than 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.timeout(), Duration::from_millis(5000));
        assert_eq!(config.checksum, ChecksumMode::Raw);
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.parity, Parity::None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SessionConfig::from_json_str(r#"{ "checksum": "hex_text" }"#).unwrap();
        assert_eq!(config.checksum, ChecksumMode::HexText);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.serial, SerialSettings::default());

        let config =
            SessionConfig::from_json_str(r#"{ "serial": { "baud_rate": 9600 } }"#).unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.stop_bits, StopBits::One);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = SessionConfig::default();
        config.timeout_ms = 250;
        config.checksum = ChecksumMode::Off;
        config.serial.flow_control = FlowControl::Hardware;

        let json = config.to_json_string().unwrap();
        assert!(json.contains("\"off\""));
        assert_eq!(SessionConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = SessionConfig::from_json_str(r#"{ "timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Config(_)));

        let err = SessionConfig::from_json_str(r#"{ "checksum": "crc32" }"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Config(_)));
    }
}
