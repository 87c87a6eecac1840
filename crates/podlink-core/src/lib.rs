//! # podlink Core Library
//!
//! Request/response engine for devices that speak a `!`-prefixed ASCII line
//! protocol over a serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Command framing and response parsing
//! - CRC16 (polynomial 0x8005) response validation
//! - Single-flight, FIFO-ordered command transactions with timeouts
//! - A parameter catalog with value validation
//!
//! ## Example
//!
//! ```rust,ignore
//! use podlink_core::prelude::*;
//!
//! let session = DeviceSession::open("/dev/ttyACM0", SessionConfig::default())?;
//! session.led(true).await?;
//! let serial = session.get_param(Parameter::SerialNumber).await?;
//! println!("Serial number: {}", serial);
//! session.close().await;
//! ```

pub mod parameters;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::parameters::{Parameter, ParameterError};
    pub use crate::protocol::{
        ChecksumMode, Command, DeviceSession, ErrorKind, FrameKind, PendingReply, ProtocolError,
        Response, SessionConfig, TransportHandle,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
