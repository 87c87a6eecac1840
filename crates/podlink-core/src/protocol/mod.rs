//! Serial Protocol Communication
//!
//! Implements the `!`-prefixed ASCII line protocol spoken by the device:
//! outbound commands are `!NAME,arg,...\r`, inbound responses are
//! `KIND,field,...;CRC16\r`.
//!
//! Only one command is ever outstanding on the wire. The protocol carries no
//! request identifiers, so responses are matched to commands purely by order.

pub mod checksum;
pub mod commands;
mod config;
mod error;
pub mod frame;
pub mod serial;
mod serializer;
mod session;
mod transaction;
pub mod transport;

pub use checksum::ChecksumMode;
pub use commands::Command;
pub use config::{DataBits, FlowControl, Parity, SerialSettings, SessionConfig, StopBits};
pub use error::{ErrorKind, FrameError, ProtocolError};
pub use frame::{FrameCodec, FrameKind, Response, ResponseFrame};
pub use serializer::{CancelHandle, PendingReply, RequestSerializer, SessionStats};
pub use session::DeviceSession;
pub use transaction::TransactionState;
pub use transport::{TransportFault, TransportHandle};

/// Default baud rate for device communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default time to wait for a response, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Line terminator used in both directions
pub const TERMINATOR: u8 = b'\r';

/// Longest inbound line accepted before the reader discards it
pub const MAX_LINE_LEN: usize = 256;
