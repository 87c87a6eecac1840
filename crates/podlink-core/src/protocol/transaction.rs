//! A single command/response exchange
//!
//! ```text
//! Idle --write ok--> Sent --listener registered--> AwaitingResponse
//!   |                                                 |
//!   +--write failed / cancelled--> Rejected <---------+--nack, bad checksum,
//!                                                     |  malformed, timeout,
//!                                  Accepted <---------+  transport, cancel
//! ```
//!
//! A transaction finishes exactly once. The timer and the listener are torn
//! down before the caller's reply is resolved.

use std::mem;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::checksum::{self, ChecksumMode};
use super::frame::{FrameCodec, FrameKind, Response, ResponseFrame};
use super::serializer::Counters;
use super::transport::{Notification, TransportHandle};
use super::{Command, ErrorKind, ProtocolError};

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Queued, nothing written yet
    Idle,
    /// Frame written and flushed
    Sent,
    /// Listening for the reply
    AwaitingResponse,
    /// Resolved with a response
    Accepted,
    /// Resolved with an error of the given kind
    Rejected(ErrorKind),
}

impl TransactionState {
    /// Whether this is a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Accepted | TransactionState::Rejected(_))
    }

    fn can_advance_to(&self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Idle, Sent)
                | (Idle, Rejected(_))
                | (Sent, AwaitingResponse)
                | (Sent, Rejected(_))
                | (AwaitingResponse, Accepted)
                | (AwaitingResponse, Rejected(_))
        )
    }
}

/// Where the result of a transaction goes
pub(crate) enum Reply {
    /// Resolve with the first acceptable frame
    Single(oneshot::Sender<Result<Response, ProtocolError>>),
    /// Collect every frame of `expected` kind until `!STATUS,IDLE`
    Collect {
        expected: String,
        tx: oneshot::Sender<Result<Vec<Response>, ProtocolError>>,
    },
}

pub(crate) struct Transaction {
    id: u64,
    command: Command,
    frame: Vec<u8>,
    submitted_at: Instant,
    timeout: Duration,
    state: TransactionState,
    reply: Option<Reply>,
    collected: Vec<Response>,
    cancel: CancellationToken,
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        command: Command,
        frame: Vec<u8>,
        timeout: Duration,
        reply: Reply,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            command,
            frame,
            submitted_at: Instant::now(),
            timeout,
            state: TransactionState::Idle,
            reply: Some(reply),
            collected: Vec::new(),
            cancel,
        }
    }

    /// Drive the exchange to a terminal state. `shutdown` fires when the
    /// owning session is closing.
    pub(crate) async fn run(
        mut self,
        link: &mut TransportHandle,
        mode: ChecksumMode,
        counters: &Counters,
        shutdown: &CancellationToken,
    ) -> TransactionState {
        let result = self.exchange(link, mode, counters, shutdown).await;
        self.finish(result)
    }

    /// Reject without touching the transport. `error` receives the command
    /// in wire form.
    pub(crate) fn close<F>(mut self, error: F) -> TransactionState
    where
        F: FnOnce(String) -> ProtocolError,
    {
        let error = error(self.wire());
        self.finish(Err(error))
    }

    fn wire(&self) -> String {
        self.command.to_string()
    }

    async fn exchange(
        &mut self,
        link: &mut TransportHandle,
        mode: ChecksumMode,
        counters: &Counters,
        shutdown: &CancellationToken,
    ) -> Result<Response, ProtocolError> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::Cancelled {
                command: self.wire(),
            });
        }

        debug!(
            id = self.id,
            command = %self.command,
            queued_ms = self.submitted_at.elapsed().as_millis() as u64,
            "sending command"
        );
        if let Err(e) = link.write_frame(&self.frame).await {
            return Err(ProtocolError::Transport {
                command: self.wire(),
                reason: e.to_string(),
            });
        }
        counters.record_sent(self.frame.len());
        self.advance(TransactionState::Sent);

        // The timer starts only once the frame is on the wire
        let timer = tokio::time::sleep(self.timeout);
        tokio::pin!(timer);
        let mut listener = link.listen();
        self.advance(TransactionState::AwaitingResponse);

        let cancel = self.cancel.clone();
        loop {
            let notification = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                _ = shutdown.cancelled() => None,
                _ = &mut timer => {
                    return Err(ProtocolError::Timeout {
                        command: self.wire(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
                notification = listener.next() => Some(notification),
            };

            match notification {
                None => {
                    return Err(ProtocolError::Cancelled {
                        command: self.wire(),
                    })
                }
                Some(Notification::Fault(fault)) => {
                    return Err(ProtocolError::Transport {
                        command: self.wire(),
                        reason: fault.to_string(),
                    })
                }
                Some(Notification::Closed) => {
                    return Err(ProtocolError::Transport {
                        command: self.wire(),
                        reason: "transport closed".to_string(),
                    })
                }
                Some(Notification::Line(line)) => {
                    counters.record_line(line.len());
                    if let Some(result) = self.on_line(&line, mode) {
                        return result;
                    }
                }
            }
        }
    }

    /// Evaluate one inbound line. `None` means keep waiting.
    fn on_line(&mut self, line: &str, mode: ChecksumMode) -> Option<Result<Response, ProtocolError>> {
        trace!(id = self.id, line, "evaluating line");
        let frame = match FrameCodec::decode(line) {
            Ok(frame) => frame,
            Err(e) => return Some(Err(self.malformed(e.to_string(), line))),
        };

        let expected = match &self.reply {
            Some(Reply::Collect { expected, .. }) => Some(expected.clone()),
            _ => None,
        };

        match FrameCodec::classify(&frame) {
            FrameKind::Nack => Some(Err(ProtocolError::Nack {
                command: self.wire(),
                line: frame.raw().to_string(),
            })),
            FrameKind::Status if expected.is_some() && frame.is_idle_status() => {
                Some(Ok(Response::from_frame(frame, &self.command)))
            }
            FrameKind::Status => {
                debug!(id = self.id, line = frame.raw(), "ignoring status line");
                None
            }
            kind => match expected {
                Some(expected) => {
                    if !same_kind(frame.kind(), &expected) {
                        debug!(id = self.id, line = frame.raw(), "skipping frame of another kind");
                        return None;
                    }
                    if !frame.checksum_ok(mode) {
                        return Some(Err(self.mismatch(&frame, mode)));
                    }
                    self.collected.push(Response::from_frame(frame, &self.command));
                    None
                }
                None => {
                    if kind == FrameKind::Ack && !frame.acknowledges(&self.command) {
                        debug!(
                            id = self.id,
                            line = frame.raw(),
                            "skipping acknowledgement for another command"
                        );
                        return None;
                    }
                    if kind == FrameKind::Echo && !frame.echoes(&self.command) {
                        return Some(Err(self.malformed(
                            format!("unexpected response kind '{}'", frame.kind()),
                            frame.raw(),
                        )));
                    }
                    if !frame.checksum_ok(mode) {
                        return Some(Err(self.mismatch(&frame, mode)));
                    }
                    Some(Ok(Response::from_frame(frame, &self.command)))
                }
            },
        }
    }

    fn malformed(&self, reason: String, line: &str) -> ProtocolError {
        ProtocolError::MalformedFrame {
            command: self.wire(),
            reason,
            line: line.to_string(),
        }
    }

    fn mismatch(&self, frame: &ResponseFrame, mode: ChecksumMode) -> ProtocolError {
        ProtocolError::ChecksumMismatch {
            command: self.wire(),
            expected: checksum::format(mode.compute(frame.body())),
            actual: frame.checksum().unwrap_or_default().to_string(),
            line: frame.raw().to_string(),
        }
    }

    fn advance(&mut self, next: TransactionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(id = self.id, from = ?self.state, to = ?next, "transaction state");
        self.state = next;
    }

    /// Resolve the caller exactly once. Later calls are no-ops.
    fn finish(&mut self, result: Result<Response, ProtocolError>) -> TransactionState {
        if self.state.is_terminal() {
            return self.state;
        }
        let elapsed_ms = self.submitted_at.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                self.advance(TransactionState::Accepted);
                debug!(id = self.id, command = %self.command, elapsed_ms, "command accepted");
            }
            Err(e) => {
                self.advance(TransactionState::Rejected(e.kind()));
                warn!(id = self.id, elapsed_ms, error = %e, "command rejected");
            }
        }

        let delivered = match self.reply.take() {
            Some(Reply::Single(tx)) => tx.send(result).is_ok(),
            Some(Reply::Collect { tx, .. }) => {
                let frames = mem::take(&mut self.collected);
                tx.send(result.map(|_| frames)).is_ok()
            }
            None => false,
        };
        if !delivered {
            trace!(id = self.id, "caller no longer waiting");
        }
        self.state
    }
}

/// Compare response kinds with or without the leading `!`
fn same_kind(kind: &str, expected: &str) -> bool {
    kind.strip_prefix('!').unwrap_or(kind) == expected.strip_prefix('!').unwrap_or(expected)
}
