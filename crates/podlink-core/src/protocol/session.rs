//! Device session
//!
//! A [`DeviceSession`] is the public entry point: open a serial link (or wrap
//! any [`TransportHandle`]), then issue commands. Commands may be issued
//! concurrently from many tasks; they go on the wire one at a time, in the
//! order they were issued.

use tracing::info;

use super::serial;
use super::{
    Command, PendingReply, ProtocolError, RequestSerializer, Response, SessionConfig,
    SessionStats, TransportHandle,
};
use crate::parameters::Parameter;

/// A session with one device
pub struct DeviceSession {
    serializer: RequestSerializer,
    config: SessionConfig,
}

impl DeviceSession {
    /// Open the serial port at `path` and start a session on it.
    /// Must be called inside a Tokio runtime.
    pub fn open(path: &str, config: SessionConfig) -> Result<Self, ProtocolError> {
        let transport = serial::open_link(path, &config.serial)?;
        info!(path, baud = config.serial.baud_rate, "session opened");
        Ok(Self::with_transport(transport, config))
    }

    /// Start a session on an already open transport
    pub fn with_transport(transport: TransportHandle, config: SessionConfig) -> Self {
        let serializer = RequestSerializer::spawn(transport, &config);
        Self { serializer, config }
    }

    /// Configuration the session was opened with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Issue a command. The reply resolves with the first acceptable response,
    /// or with the reason the command failed.
    pub fn issue(&self, command: Command) -> PendingReply<Response> {
        self.serializer.enqueue(command)
    }

    /// Issue a command whose answer spans several frames. Collects every
    /// frame whose kind is `expected_kind` until the device reports
    /// `!STATUS,IDLE`.
    pub fn issue_collect(
        &self,
        command: Command,
        expected_kind: impl Into<String>,
    ) -> PendingReply<Vec<Response>> {
        self.serializer.enqueue_collect(command, expected_kind)
    }

    /// Switch the status LED
    pub async fn led(&self, on: bool) -> Result<(), ProtocolError> {
        self.issue(Command::led(on)).await.map(|_| ())
    }

    /// Read a parameter value
    pub async fn get_param(&self, param: Parameter) -> Result<String, ProtocolError> {
        let command = Command::get(param);
        let wire = command.to_string();
        let response = self.issue(command).await?;
        match response.value() {
            Some(value) => Ok(value.to_string()),
            None => Err(ProtocolError::MalformedFrame {
                command: wire,
                reason: "response carried no value".to_string(),
                line: response.raw().to_string(),
            }),
        }
    }

    /// Set a parameter for the current power cycle. The value is validated
    /// before anything is sent.
    pub async fn set_param(&self, param: Parameter, value: &str) -> Result<Response, ProtocolError> {
        let command = Command::set(param, value)?;
        self.issue(command).await
    }

    /// Commit set parameters to non-volatile memory
    pub async fn save(&self) -> Result<Response, ProtocolError> {
        self.issue(Command::save()).await
    }

    /// Counters for this session
    pub fn stats(&self) -> SessionStats {
        self.serializer.stats()
    }

    /// Commands waiting for admission
    pub fn queued(&self) -> usize {
        self.serializer.queued()
    }

    /// Commands on the wire (never more than 1)
    pub fn in_flight(&self) -> usize {
        self.serializer.in_flight()
    }

    /// Live listeners on the transport (never more than 1)
    pub fn listener_count(&self) -> usize {
        self.serializer.listeners()
    }

    /// Close the session. The active command is cancelled, queued commands
    /// fail with [`ProtocolError::SessionClosed`], and the transport is
    /// released once this returns.
    pub async fn close(self) {
        self.serializer.shutdown().await;
        info!("session closed");
    }
}
