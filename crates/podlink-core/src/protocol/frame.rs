//! Frame encoding/decoding
//!
//! Outbound frame: `!NAME,arg1,arg2\r` (no checksum).
//!
//! Inbound frame: `KIND,field1,field2;XXXX\r` where `KIND` is `!ACK`,
//! `!NACK`, `!STATUS` or the echoed command name, and `XXXX` is the CRC16 of
//! everything before the `;` as 4 uppercase hex digits. Status lines may
//! carry an empty checksum field (`!STATUS,IDLE;`).

use super::checksum::{self, ChecksumMode};
use super::{Command, FrameError, ProtocolError, TERMINATOR};

/// Characters that may not appear in a command name or argument
const FORBIDDEN: [char; 4] = ['\r', '\n', ',', ';'];

/// How a response line relates to the outstanding command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `!ACK` - command accepted, possibly with data
    Ack,
    /// `!NACK` - command refused
    Nack,
    /// `!STATUS` - status marker, terminates multi-frame exchanges
    Status,
    /// Any other kind: the device echoed a command name
    Echo,
}

/// A decoded response line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    raw: String,
    body: String,
    kind: String,
    fields: Vec<String>,
    checksum: Option<String>,
}

impl ResponseFrame {
    /// The line as received, without the terminator
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Everything before the `;`, the part the checksum covers
    pub fn body(&self) -> &str {
        &self.body
    }

    /// First comma-separated token of the body
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Remaining comma-separated tokens of the body
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Checksum field, `None` when the line ended in a bare `;`
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Whether this is the `!STATUS,IDLE` end-of-exchange marker
    pub fn is_idle_status(&self) -> bool {
        self.kind == "!STATUS" && self.fields.first().map(String::as_str) == Some("IDLE")
    }

    /// Whether the kind names `command` (with or without the leading `!`)
    pub fn echoes(&self, command: &Command) -> bool {
        self.kind.strip_prefix('!').unwrap_or(&self.kind) == command.name()
    }

    /// Whether an acknowledgement belongs to `command`: either it carries
    /// no fields or its first field repeats the command name.
    pub fn acknowledges(&self, command: &Command) -> bool {
        self.fields.first().map_or(true, |name| name == command.name())
    }

    /// Check the frame's checksum under `mode`. A missing checksum fails
    /// unless checking is off.
    pub fn checksum_ok(&self, mode: ChecksumMode) -> bool {
        match &self.checksum {
            Some(field) => mode.validate(&self.body, field),
            None => !mode.is_enabled(),
        }
    }
}

/// A validated response, resolved for a specific command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    kind: FrameKind,
    data: Vec<String>,
    raw: String,
}

impl Response {
    /// Build the caller-facing response for `command` from an accepted frame.
    ///
    /// An `!ACK` that repeats the command name (`!ACK,GET,42`) has that name
    /// stripped, so `data` only holds what the device returned.
    pub fn from_frame(frame: ResponseFrame, command: &Command) -> Self {
        let kind = FrameCodec::classify(&frame);
        let mut data = frame.fields;
        if kind == FrameKind::Ack && data.first().map(String::as_str) == Some(command.name()) {
            data.remove(0);
        }
        Self {
            kind,
            data,
            raw: frame.raw,
        }
    }

    /// Classification of the line this response came from
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Data fields returned by the device
    pub fn data(&self) -> &[String] {
        &self.data
    }

    /// The returned value: the last data field, if any
    pub fn value(&self) -> Option<&str> {
        self.data.last().map(String::as_str)
    }

    /// The line as received
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Wire codec for commands and responses
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a command into its outbound frame, terminator included
    pub fn encode(command: &Command) -> Result<Vec<u8>, ProtocolError> {
        let reject = |reason: String| ProtocolError::Encoding {
            command: command.to_string(),
            reason,
        };

        if command.name().is_empty() {
            return Err(reject("command name is empty".to_string()));
        }
        check_token("name", command.name()).map_err(reject)?;
        for (i, arg) in command.arguments().iter().enumerate() {
            check_token(&format!("argument {}", i), arg).map_err(reject)?;
        }

        let mut bytes = command.to_string().into_bytes();
        bytes.push(TERMINATOR);
        Ok(bytes)
    }

    /// Decode one received line.
    ///
    /// Trailing CR/LF and surrounding whitespace are ignored. The line must
    /// contain a `;` and a non-empty kind; nothing is returned otherwise.
    pub fn decode(line: &str) -> Result<ResponseFrame, FrameError> {
        let raw = line.trim_end_matches(['\r', '\n']).trim();
        if raw.is_empty() {
            return Err(FrameError::Empty);
        }

        let (body, checksum) = raw.split_once(';').ok_or(FrameError::MissingChecksum)?;
        let mut tokens = body.split(',');
        let kind = tokens.next().unwrap_or_default().trim();
        if kind.is_empty() {
            return Err(FrameError::EmptyKind);
        }
        let fields = tokens.map(|t| t.trim().to_string()).collect();
        let checksum = checksum.trim();

        Ok(ResponseFrame {
            raw: raw.to_string(),
            body: body.to_string(),
            kind: kind.to_string(),
            fields,
            checksum: (!checksum.is_empty()).then(|| checksum.to_string()),
        })
    }

    /// Classify a decoded frame
    pub fn classify(frame: &ResponseFrame) -> FrameKind {
        match frame.kind() {
            "!ACK" => FrameKind::Ack,
            "!NACK" => FrameKind::Nack,
            "!STATUS" => FrameKind::Status,
            _ => FrameKind::Echo,
        }
    }

    /// Render a response line for `body` with its checksum under `mode`,
    /// without the terminator. Used by device simulators and tests.
    pub fn render_response(body: &str, mode: ChecksumMode) -> String {
        format!("{};{}", body, checksum::format(mode.compute(body)))
    }
}

fn check_token(what: &str, token: &str) -> Result<(), String> {
    if let Some(c) = token.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(format!("{} contains reserved character {:?}", what, c));
    }
    if !token.is_ascii() {
        return Err(format!("{} is not ASCII", what));
    }
    Ok(())
}
