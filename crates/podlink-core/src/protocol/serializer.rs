//! Request serializer
//!
//! Callers enqueue commands from any task; a single IO task owns the
//! transport and admits them one at a time in FIFO order. The next command is
//! written only after the previous one reached a terminal state, so there is
//! never more than one command outstanding on the wire.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::checksum::ChecksumMode;
use super::transaction::{Reply, Transaction, TransactionState};
use super::transport::{LinkStatus, TransportHandle};
use super::{Command, FrameCodec, ProtocolError, Response, SessionConfig};

/// Snapshot of session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames written to the transport
    pub frames_sent: u64,
    /// Bytes written, terminators included
    pub bytes_sent: u64,
    /// Lines delivered to a listening transaction
    pub lines_received: u64,
    /// Bytes in those lines, terminators excluded
    pub bytes_received: u64,
    /// Transactions that ended in `Accepted`
    pub accepted: u64,
    /// Transactions that ended in `Rejected`
    pub rejected: u64,
}

/// Live counters shared between the IO task and the handles
#[derive(Debug, Default)]
pub(crate) struct Counters {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    lines_received: AtomicU64,
    bytes_received: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
}

impl Counters {
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_line(&self, bytes: usize) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_outcome(&self, state: TransactionState) {
        match state {
            TransactionState::Accepted => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
            }
            TransactionState::Rejected(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            lines_received: self.lines_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Cancels the command behind a [`PendingReply`] from elsewhere
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Request cancellation. Has no effect once the command has finished.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Completion of an enqueued command.
///
/// Resolves exactly once. Dropping it before it resolves cancels the command:
/// it is skipped if still queued, or rejected and its slot released if it is
/// already on the wire.
#[must_use = "dropping a PendingReply cancels the command"]
#[derive(Debug)]
pub struct PendingReply<T> {
    rx: oneshot::Receiver<Result<T, ProtocolError>>,
    command: String,
    cancel: CancellationToken,
    resolved: bool,
}

impl<T> PendingReply<T> {
    fn new(
        rx: oneshot::Receiver<Result<T, ProtocolError>>,
        command: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            command,
            cancel,
            resolved: false,
        }
    }

    /// Wire form of the command this reply belongs to
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Handle that can cancel this command from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    /// Cancel the command
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<T> Future for PendingReply<T> {
    type Output = Result<T, ProtocolError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.resolved = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                this.resolved = true;
                Poll::Ready(Err(ProtocolError::SessionClosed {
                    command: this.command.clone(),
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for PendingReply<T> {
    fn drop(&mut self) {
        if !self.resolved {
            self.cancel.cancel();
        }
    }
}

/// FIFO admission of commands onto a single transport
pub struct RequestSerializer {
    queue: mpsc::UnboundedSender<Transaction>,
    next_id: AtomicU64,
    default_timeout_ms: u64,
    counters: Arc<Counters>,
    listeners: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RequestSerializer {
    /// Take ownership of `transport` and start the IO task.
    /// Must be called inside a Tokio runtime.
    pub fn spawn(transport: TransportHandle, config: &SessionConfig) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let listeners = transport.listener_gauge();
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(io_loop(
            transport,
            rx,
            config.checksum,
            counters.clone(),
            shutdown.clone(),
        ));

        Self {
            queue,
            next_id: AtomicU64::new(1),
            default_timeout_ms: config.timeout_ms,
            counters,
            listeners,
            shutdown,
            task: Some(task),
        }
    }

    /// Enqueue a command that resolves with its first acceptable response
    pub fn enqueue(&self, command: Command) -> PendingReply<Response> {
        self.submit(command, Reply::Single)
    }

    /// Enqueue a command that resolves with every frame of `expected_kind`
    /// received before the device reports `!STATUS,IDLE`
    pub fn enqueue_collect(
        &self,
        command: Command,
        expected_kind: impl Into<String>,
    ) -> PendingReply<Vec<Response>> {
        let expected = expected_kind.into();
        self.submit(command, move |tx| Reply::Collect { expected, tx })
    }

    fn submit<T, F>(&self, command: Command, make_reply: F) -> PendingReply<T>
    where
        F: FnOnce(oneshot::Sender<Result<T, ProtocolError>>) -> Reply,
    {
        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let pending = PendingReply::new(rx, command.to_string(), cancel.clone());

        // Encoding failures never reach the queue
        let frame = match FrameCodec::encode(&command) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "rejecting command before admission");
                let _ = tx.send(Err(e));
                return pending;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout_ms = command.effective_timeout_ms(self.default_timeout_ms);
        let txn = Transaction::new(
            id,
            command,
            frame,
            std::time::Duration::from_millis(timeout_ms),
            make_reply(tx),
            cancel,
        );

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(txn)) = self.queue.send(txn) {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            txn.close(|command| ProtocolError::SessionClosed { command });
        }
        pending
    }

    /// Commands waiting for admission
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Commands currently on the wire (0 or 1)
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Listeners currently registered on the transport (0 or 1)
    pub fn listeners(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }

    /// Snapshot of the session counters
    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Stop admitting commands and wait for the IO task to finish.
    ///
    /// The active command is rejected as cancelled; queued commands are
    /// rejected with [`ProtocolError::SessionClosed`].
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "session IO task ended abnormally");
            }
        }
    }
}

impl Drop for RequestSerializer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn io_loop(
    mut transport: TransportHandle,
    mut queue: mpsc::UnboundedReceiver<Transaction>,
    mode: ChecksumMode,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
) {
    debug!("session IO task started");
    loop {
        let txn = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            txn = queue.recv() => match txn {
                Some(txn) => txn,
                None => break,
            },
        };
        counters.queued.fetch_sub(1, Ordering::SeqCst);

        if transport.drain_stale() == LinkStatus::Closed {
            counters.record_outcome(txn.close(transport_closed));
            reject_queued(&mut queue, &counters, transport_closed);
            info!("transport closed, session stopped");
            return;
        }

        counters.in_flight.store(1, Ordering::SeqCst);
        let state = txn.run(&mut transport, mode, &counters, &shutdown).await;
        counters.in_flight.store(0, Ordering::SeqCst);
        counters.record_outcome(state);

        if transport.is_closed() {
            reject_queued(&mut queue, &counters, transport_closed);
            info!("transport closed, session stopped");
            return;
        }
    }

    reject_queued(&mut queue, &counters, |command| ProtocolError::SessionClosed {
        command,
    });
    debug!("session IO task stopped");
}

fn transport_closed(command: String) -> ProtocolError {
    ProtocolError::Transport {
        command,
        reason: "transport closed".to_string(),
    }
}

/// Close the queue and reject everything still in it
fn reject_queued<F>(
    queue: &mut mpsc::UnboundedReceiver<Transaction>,
    counters: &Counters,
    error: F,
) where
    F: Fn(String) -> ProtocolError,
{
    queue.close();
    while let Ok(txn) = queue.try_recv() {
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.record_outcome(txn.close(&error));
    }
}
