//! Serial port handling
//!
//! Opens the device's serial port as an async stream and hands it to a
//! [`TransportHandle`], which reassembles inbound lines.

use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

use super::{ProtocolError, SerialSettings, TransportHandle};

/// Open `path` with `settings` and wrap it as a line transport.
/// Must be called inside a Tokio runtime.
pub fn open_link(path: &str, settings: &SerialSettings) -> Result<TransportHandle, ProtocolError> {
    let mut port = tokio_serial::new(path, settings.baud_rate)
        .data_bits(settings.data_bits.into())
        .parity(settings.parity.into())
        .stop_bits(settings.stop_bits.into())
        .flow_control(settings.flow_control.into())
        .open_native_async()
        .map_err(|e| ProtocolError::TransportOpen {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

    configure_port(&mut port);
    clear_buffers(&mut port).map_err(|e| ProtocolError::TransportOpen {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    debug!(path, baud = settings.baud_rate, "serial port open");
    Ok(TransportHandle::from_stream(port, settings.max_line_len))
}

/// Assert the modem control lines
fn configure_port(port: &mut SerialStream) {
    // Opening the port can toggle DTR, which resets some USB CDC devices.
    // Keep it asserted.
    if let Err(e) = port.write_data_terminal_ready(true) {
        warn!(error = %e, "failed to set DTR high (continuing)");
    }
    if let Err(e) = port.write_request_to_send(true) {
        warn!(error = %e, "failed to set RTS high (continuing)");
    }
}

/// Drop anything buffered before the session starts
fn clear_buffers(port: &mut SerialStream) -> serialport::Result<()> {
    port.clear(serialport::ClearBuffer::All)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorKind;

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let err = open_link("/dev/podlink-does-not-exist", &SerialSettings::default())
            .err()
            .expect("opening a missing port must fail");
        assert_eq!(err.kind(), ErrorKind::TransportOpen);
        assert!(err.to_string().contains("/dev/podlink-does-not-exist"));
    }
}
