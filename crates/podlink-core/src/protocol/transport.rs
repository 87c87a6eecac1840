//! Transport seam between the protocol engine and the byte stream
//!
//! A [`TransportHandle`] bundles the three things the engine needs from a
//! link: a writer for outbound frames, a channel delivering one reassembled
//! text line per notification, and a separate channel for transport faults.
//!
//! Only the transaction holding the active slot touches the handle. It
//! registers a [`Listener`] on the two notification channels for exactly the
//! span between a successful write and its terminal state.

use futures::StreamExt;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, FramedRead};
use tracing::{debug, trace, warn};

use super::TERMINATOR;

/// Capacity of the inbound line channel
const LINE_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the fault channel
const FAULT_CHANNEL_CAPACITY: usize = 16;

/// An error surfaced by the transport outside of a write call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFault {
    message: String,
}

impl TransportFault {
    /// Create a fault with a human-readable description
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Description of the fault
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// State of the inbound side after draining stale notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkStatus {
    Open,
    Closed,
}

/// One notification delivered to a listening transaction
#[derive(Debug)]
pub(crate) enum Notification {
    Line(String),
    Fault(TransportFault),
    Closed,
}

/// Exclusive handle to a line-oriented transport
pub struct TransportHandle {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    lines: mpsc::Receiver<String>,
    errors: mpsc::Receiver<TransportFault>,
    lines_closed: bool,
    errors_closed: bool,
    listeners: Arc<AtomicUsize>,
    reader: Option<JoinHandle<()>>,
}

impl TransportHandle {
    /// Assemble a handle from a writer and the two notification channels.
    ///
    /// The line channel closing means the link is gone for good; the error
    /// channel closing only means no more faults will be reported.
    pub fn new<W>(
        writer: W,
        lines: mpsc::Receiver<String>,
        errors: mpsc::Receiver<TransportFault>,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Box::new(writer),
            lines,
            errors,
            lines_closed: false,
            errors_closed: false,
            listeners: Arc::new(AtomicUsize::new(0)),
            reader: None,
        }
    }

    /// Wrap a bidirectional byte stream, reassembling CR (or LF) terminated
    /// lines in a background reader task. Must be called inside a Tokio runtime.
    pub fn from_stream<S>(stream: S, max_line_len: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (fault_tx, fault_rx) = mpsc::channel(FAULT_CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_lines(read_half, max_line_len, line_tx, fault_tx));

        let mut handle = Self::new(write_half, line_rx, fault_rx);
        handle.reader = Some(reader);
        handle
    }

    /// Shared count of live listeners, for diagnostics
    pub(crate) fn listener_gauge(&self) -> Arc<AtomicUsize> {
        self.listeners.clone()
    }

    /// Whether the inbound line channel has ended
    pub(crate) fn is_closed(&self) -> bool {
        self.lines_closed
    }

    /// Write one complete frame and flush it
    pub(crate) async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        if self.lines_closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        self.writer.write_all(frame).await?;
        self.writer.flush().await
    }

    /// Throw away lines and faults that arrived while no transaction was
    /// listening, such as a late reply to a command that already timed out.
    pub(crate) fn drain_stale(&mut self) -> LinkStatus {
        while !self.lines_closed {
            match self.lines.try_recv() {
                Ok(line) => debug!(line, "discarding stale line"),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.lines_closed = true,
            }
        }
        while !self.errors_closed {
            match self.errors.try_recv() {
                Ok(fault) => warn!(%fault, "transport fault while idle"),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.errors_closed = true,
            }
        }
        if self.lines_closed {
            LinkStatus::Closed
        } else {
            LinkStatus::Open
        }
    }

    /// Register the single listener for the active transaction
    pub(crate) fn listen(&mut self) -> Listener<'_> {
        let previous = self.listeners.fetch_add(1, Ordering::SeqCst);
        debug_assert_eq!(previous, 0, "listener registered while another is live");
        Listener { handle: self }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Scoped registration on the inbound-line and error notifications.
/// Dropping it deregisters.
pub(crate) struct Listener<'a> {
    handle: &'a mut TransportHandle,
}

impl Listener<'_> {
    /// Wait for the next notification. Faults take priority over lines.
    pub(crate) async fn next(&mut self) -> Notification {
        let handle = &mut *self.handle;
        loop {
            if handle.lines_closed {
                return Notification::Closed;
            }
            tokio::select! {
                biased;

                fault = handle.errors.recv(), if !handle.errors_closed => match fault {
                    Some(fault) => return Notification::Fault(fault),
                    None => handle.errors_closed = true,
                },

                line = handle.lines.recv() => match line {
                    Some(line) => return Notification::Line(line),
                    None => handle.lines_closed = true,
                },
            }
        }
    }
}

impl Drop for Listener<'_> {
    fn drop(&mut self) {
        self.handle.listeners.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An item produced by [`LineCodec`]
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    Line(String),
    /// A line exceeded the length limit and was discarded
    Overflow,
}

/// Splits the inbound byte stream on CR or LF into trimmed, non-empty lines.
///
/// Over-long lines are reported as [`Inbound::Overflow`] instead of an error
/// so the stream keeps going after them.
pub(crate) struct LineCodec {
    inner: AnyDelimiterCodec,
}

impl LineCodec {
    pub(crate) fn new(max_line_len: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                vec![TERMINATOR, b'\n'],
                vec![TERMINATOR],
                max_line_len,
            ),
        }
    }

    fn map(
        &mut self,
        result: Result<Option<tokio_util::bytes::Bytes>, AnyDelimiterCodecError>,
    ) -> Result<Option<Option<Inbound>>, io::Error> {
        match result {
            Ok(Some(chunk)) => {
                let line = String::from_utf8_lossy(&chunk).trim().to_string();
                if line.is_empty() {
                    Ok(Some(None))
                } else {
                    Ok(Some(Some(Inbound::Line(line))))
                }
            }
            Ok(None) => Ok(None),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Ok(Some(Some(Inbound::Overflow))),
            Err(AnyDelimiterCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for LineCodec {
    type Item = Inbound;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, io::Error> {
        loop {
            let result = self.inner.decode(src);
            match self.map(result)? {
                Some(Some(item)) => return Ok(Some(item)),
                // Empty chunk between CR and LF
                Some(None) => continue,
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, io::Error> {
        loop {
            let result = self.inner.decode_eof(src);
            match self.map(result)? {
                Some(Some(item)) => return Ok(Some(item)),
                Some(None) => continue,
                None => return Ok(None),
            }
        }
    }
}

/// Reader task: reassemble lines and forward them until the stream ends
async fn read_lines<R>(
    reader: R,
    max_line_len: usize,
    lines: mpsc::Sender<String>,
    faults: mpsc::Sender<TransportFault>,
) where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(reader, LineCodec::new(max_line_len));
    while let Some(item) = framed.next().await {
        match item {
            Ok(Inbound::Line(line)) => {
                trace!(line, "line received");
                if lines.send(line).await.is_err() {
                    debug!("line receiver dropped, stopping reader");
                    return;
                }
            }
            Ok(Inbound::Overflow) => {
                warn!(max_line_len, "inbound line too long, discarded");
                let _ = faults
                    .send(TransportFault::new(format!(
                        "inbound line exceeded {} bytes",
                        max_line_len
                    )))
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "transport read failed");
                let _ = faults.send(TransportFault::new(e.to_string())).await;
                break;
            }
        }
    }
    debug!("transport stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncReadExt;

    fn decode_all(codec: &mut LineCodec, input: &[u8]) -> Vec<Inbound> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(item) = codec.decode(&mut buf).unwrap() {
            out.push(item);
        }
        out
    }

    #[test]
    fn test_line_codec_splits_on_cr_and_lf() {
        let mut codec = LineCodec::new(256);
        let items = decode_all(&mut codec, b"!ACK,GET,42;08D2\r!NACK;0000\r\n!STATUS,IDLE;\r");
        assert_eq!(
            items,
            vec![
                Inbound::Line("!ACK,GET,42;08D2".into()),
                Inbound::Line("!NACK;0000".into()),
                Inbound::Line("!STATUS,IDLE;".into()),
            ]
        );
    }

    #[test]
    fn test_line_codec_keeps_partial_line() {
        let mut codec = LineCodec::new(256);
        let mut buf = BytesMut::from(&b"!ACK,GE"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"T,42;08D2\r");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Inbound::Line("!ACK,GET,42;08D2".into()))
        );
    }

    #[test]
    fn test_line_codec_overflow_then_recovers() {
        let mut codec = LineCodec::new(8);
        let items = decode_all(&mut codec, b"0123456789ABCDEF\r!NACK;0\r");
        assert_eq!(items.first(), Some(&Inbound::Overflow));
        assert_eq!(items.last(), Some(&Inbound::Line("!NACK;0".into())));
    }

    #[tokio::test]
    async fn test_from_stream_round_trip() {
        let (engine_side, mut device_side) = tokio::io::duplex(256);
        let mut handle = TransportHandle::from_stream(engine_side, 256);

        handle.write_frame(b"!LED,1\r").await.unwrap();
        let mut buf = [0u8; 7];
        device_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"!LED,1\r");

        device_side.write_all(b"!NACK;0000\r").await.unwrap();
        let mut listener = handle.listen();
        match listener.next().await {
            Notification::Line(line) => assert_eq!(line, "!NACK;0000"),
            other => panic!("expected line, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listener_gauge_tracks_registration() {
        let (_line_tx, line_rx) = mpsc::channel(4);
        let (_fault_tx, fault_rx) = mpsc::channel(4);
        let mut handle = TransportHandle::new(tokio::io::sink(), line_rx, fault_rx);
        let gauge = handle.listener_gauge();

        assert_eq!(gauge.load(Ordering::SeqCst), 0);
        {
            let _listener = handle.listen();
            assert_eq!(gauge.load(Ordering::SeqCst), 1);
        }
        assert_eq!(gauge.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fault_has_priority_and_close_is_reported() {
        let (line_tx, line_rx) = mpsc::channel(4);
        let (fault_tx, fault_rx) = mpsc::channel(4);
        let mut handle = TransportHandle::new(tokio::io::sink(), line_rx, fault_rx);

        line_tx.send("!ACK;9AA7".into()).await.unwrap();
        fault_tx.send(TransportFault::new("framing error")).await.unwrap();
        {
            let mut listener = handle.listen();
            assert!(matches!(listener.next().await, Notification::Fault(_)));
            assert!(matches!(listener.next().await, Notification::Line(_)));
        }

        drop(line_tx);
        assert_eq!(handle.drain_stale(), LinkStatus::Closed);
        assert!(handle.is_closed());
        assert!(handle.write_frame(b"!PING\r").await.is_err());
    }

    #[tokio::test]
    async fn test_drain_stale_discards_idle_lines() {
        let (line_tx, line_rx) = mpsc::channel(4);
        let (_fault_tx, fault_rx) = mpsc::channel(4);
        let mut handle = TransportHandle::new(tokio::io::sink(), line_rx, fault_rx);

        line_tx.send("!ACK,GET,7;1502".into()).await.unwrap();
        assert_eq!(handle.drain_stale(), LinkStatus::Open);

        line_tx.send("!ACK,GET,8;0000".into()).await.unwrap();
        let mut listener = handle.listen();
        match listener.next().await {
            Notification::Line(line) => assert_eq!(line, "!ACK,GET,8;0000"),
            other => panic!("expected line, got {:?}", other),
        }
    }
}
