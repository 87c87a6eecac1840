//! Protocol commands
//!
//! A [`Command`] is a name plus an ordered list of arguments. Arguments are
//! opaque strings here; callers that set named parameters validate the value
//! against the [`Parameter`] catalog first.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::parameters::Parameter;
use super::ProtocolError;

/// A command to send to the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    name: String,
    arguments: Vec<String>,
    /// Timeout for this specific command (ms). If None, uses the session default
    timeout_ms: Option<u64>,
}

impl Command {
    /// Create a new command with no arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Create a command with the given arguments
    pub fn with_args<I, S>(name: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
            timeout_ms: None,
        }
    }

    /// Append one argument
    pub fn arg(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    /// Override the session response timeout for this command
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Command name as sent, without the leading `!`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments in wire order
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Per-command timeout override, if any
    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    /// Effective timeout given the session default
    pub fn effective_timeout_ms(&self, default_ms: u64) -> u64 {
        self.timeout_ms.unwrap_or(default_ms)
    }

    /// Switch the status LED on or off (`LED,1` / `LED,0`)
    pub fn led(on: bool) -> Self {
        Self::with_args("LED", [if on { "1" } else { "0" }])
    }

    /// Read a device parameter (`GET,<name>`)
    pub fn get(param: Parameter) -> Self {
        Self::with_args("GET", [param.as_str()])
    }

    /// Set a device parameter for the current power cycle (`SET,<name>,<value>`).
    ///
    /// The value is checked against the parameter's validator before the
    /// command is built.
    pub fn set(param: Parameter, value: &str) -> Result<Self, ProtocolError> {
        param.validate(value)?;
        Ok(Self::with_args("SET", [param.as_str(), value]))
    }

    /// Commit all set parameters to non-volatile memory (`CAL,1,1`)
    pub fn save() -> Self {
        Self::with_args("CAL", ["1", "1"])
    }

    /// Reboot into the firmware-update bootloader (`DFU,0`)
    pub fn dfu() -> Self {
        Self::with_args("DFU", ["0"])
    }
}

/// Displays the command in wire form without the terminator, e.g. `!GET,SER_NUMBER`
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.name)?;
        for arg in &self.arguments {
            write!(f, ",{}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorKind;

    #[test]
    fn test_command_creation() {
        let cmd = Command::new("PING");
        assert_eq!(cmd.name(), "PING");
        assert!(cmd.arguments().is_empty());
        assert_eq!(cmd.timeout_ms(), None);
        assert_eq!(cmd.effective_timeout_ms(5000), 5000);
    }

    #[test]
    fn test_command_with_timeout() {
        let cmd = Command::new("CAL").arg("1").arg("1").with_timeout(8000);
        assert_eq!(cmd.arguments(), ["1", "1"]);
        assert_eq!(cmd.effective_timeout_ms(5000), 8000);
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::led(true).to_string(), "!LED,1");
        assert_eq!(Command::led(false).to_string(), "!LED,0");
        assert_eq!(Command::new("PING").to_string(), "!PING");
        assert_eq!(Command::get(Parameter::SerialNumber).to_string(), "!GET,SER_NUMBER");
        assert_eq!(Command::save().to_string(), "!CAL,1,1");
        assert_eq!(Command::dfu().to_string(), "!DFU,0");
    }

    #[test]
    fn test_set_validates_value() {
        let cmd = Command::set(Parameter::LedDrive, "128").unwrap();
        assert_eq!(cmd.to_string(), "!SET,LED_DRIVE,128");

        let err = Command::set(Parameter::LedDrive, "300").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_set_rejects_padded_value() {
        // The value would be sent as-is, so " 128" must not pass
        let err = Command::set(Parameter::LedDrive, " 128").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }
}
