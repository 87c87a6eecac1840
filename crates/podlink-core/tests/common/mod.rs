//! Scripted device for protocol tests
//!
//! The device sits on the far end of an in-memory duplex stream. Each frame
//! it receives is handed to a script, which decides what to answer and when.

#![allow(dead_code)]

use podlink_core::protocol::{
    ChecksumMode, DeviceSession, FrameCodec, SessionConfig, TransportHandle,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Route library logs to the test harness. Run with `RUST_LOG=podlink_core=trace`
/// to see every transition.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the device does in response to one frame
pub struct Answer {
    pub delay: Duration,
    pub lines: Vec<String>,
}

impl Answer {
    pub fn now<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::after(Duration::ZERO, lines)
    }

    pub fn after<I, S>(delay: Duration, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            delay,
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Never answer
    pub fn silent() -> Self {
        Self::now(Vec::<String>::new())
    }
}

/// A response line with a valid raw-byte checksum
pub fn line(body: &str) -> String {
    FrameCodec::render_response(body, ChecksumMode::Raw)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Received(String),
    Replied(String),
}

/// Everything the device saw and did, in order
#[derive(Debug, Clone, Default)]
pub struct DeviceLog(Arc<Mutex<Vec<Event>>>);

impl DeviceLog {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    /// Frames received, in arrival order
    pub fn received(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Received(frame) => Some(frame),
                Event::Replied(_) => None,
            })
            .collect()
    }

    /// Wait until at least `count` frames have arrived
    pub async fn wait_for_frames(&self, count: usize) {
        for _ in 0..1000 {
            if self.received().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("device saw {:?}, expected {} frames", self.received(), count);
    }
}

/// Run a device on `stream`, answering each frame with `script`
pub fn spawn_device<F>(stream: DuplexStream, script: F) -> DeviceLog
where
    F: FnMut(&str) -> Answer + Send + 'static,
{
    let log = DeviceLog::default();
    let (read_half, mut write_half) = tokio::io::split(stream);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let reader_log = log.clone();
    tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\r', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let frame = String::from_utf8_lossy(&buf)
                        .trim_end_matches('\r')
                        .to_string();
                    reader_log.push(Event::Received(frame.clone()));
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let responder_log = log.clone();
    let mut script = script;
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let answer = script(&frame);
            if !answer.delay.is_zero() {
                tokio::time::sleep(answer.delay).await;
            }
            for line in &answer.lines {
                let bytes = format!("{}\r", line);
                if write_half.write_all(bytes.as_bytes()).await.is_err() {
                    return;
                }
            }
            responder_log.push(Event::Replied(frame));
        }
    });

    log
}

/// Start a session wired to a scripted device
pub fn start<F>(config: SessionConfig, script: F) -> (DeviceSession, DeviceLog)
where
    F: FnMut(&str) -> Answer + Send + 'static,
{
    init_tracing();
    let (engine_side, device_side) = tokio::io::duplex(4096);
    let log = spawn_device(device_side, script);
    let transport = TransportHandle::from_stream(engine_side, config.serial.max_line_len);
    (DeviceSession::with_transport(transport, config), log)
}

/// Session config with a short timeout
pub fn fast_config(timeout_ms: u64) -> SessionConfig {
    SessionConfig {
        timeout_ms,
        ..SessionConfig::default()
    }
}
