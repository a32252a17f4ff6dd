// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Single-peer serial session over a byte-stream transport.
//!
//! A [`SerialSession`] owns at most one open transport. Connecting, writing
//! and reading all happen on spawned tasks; results are reported to the
//! owner as [`SessionEvent`]s over an mpsc channel, in emission order.
//!
//! Every connection attempt gets a new generation number. Tasks bound to an
//! older generation (a superseded connect, a receive loop for a transport
//! that was replaced or closed) never emit events or touch session state.

use parking_lot::Mutex;
use std::borrow::Cow;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::device::DeviceRef;
use super::transport::TransportProvider;

/// Default receive buffer size.
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// Events emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transport open, receive loop starting.
    Connected(DeviceRef),
    /// Connection attempt failed.
    ConnectionFailed(String),
    /// Bytes from one receive call.
    DataReceived(Vec<u8>),
    /// Receive loop ended on a transport error or end of stream.
    ReadEnded(String),
    /// Payload fully written and flushed.
    Sent(Vec<u8>),
    /// Write failed. The session stays open.
    SendFailed(String),
}

impl SessionEvent {
    /// Payload decoded as text, for data-carrying events.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            SessionEvent::DataReceived(bytes) | SessionEvent::Sent(bytes) => {
                Some(decode_text(bytes))
            }
            _ => None,
        }
    }
}

/// Lossy UTF-8 decoding; malformed sequences become U+FFFD.
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// State of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Failed => "Connection error",
            ConnectionState::Closed => "Closed",
        }
    }
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectFailed(#[source] io::Error),

    #[error("connection timed out after {0:?}")]
    ConnectTimedOut(Duration),

    #[error("connection attempt superseded")]
    Superseded,

    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    #[error("session closed")]
    Closed,

    #[error("worker task failed: {0}")]
    Worker(#[from] JoinError),
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Maximum bytes per receive call.
    pub read_buffer_size: usize,
    /// Bound on the channel open. `None` waits as long as the transport does.
    pub connect_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER,
            connect_timeout: None,
        }
    }
}

/// The open transport and the receive loop bound to it.
struct Link<S> {
    generation: u64,
    writer: Arc<tokio::sync::Mutex<WriteHalf<S>>>,
    /// Set on teardown; in-flight sends give up the writer when it flips.
    closing: watch::Sender<bool>,
    cancel: oneshot::Sender<()>,
    reader: JoinHandle<()>,
}

struct Inner<S> {
    state: ConnectionState,
    generation: u64,
    device: Option<DeviceRef>,
    link: Option<Link<S>>,
}

/// Serial session manager for one peer at a time.
pub struct SerialSession<P: TransportProvider> {
    provider: Arc<P>,
    options: SessionOptions,
    inner: Arc<Mutex<Inner<P::Stream>>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl<P: TransportProvider> Clone for SerialSession<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            options: self.options.clone(),
            inner: self.inner.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

impl<P: TransportProvider> SerialSession<P> {
    /// Create an idle session reporting to `event_tx`.
    pub fn new(
        provider: P,
        options: SessionOptions,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            provider: Arc::new(provider),
            options,
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::Idle,
                generation: 0,
                device: None,
                link: None,
            })),
            event_tx,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Device of the current or most recent attempt.
    pub fn device(&self) -> Option<DeviceRef> {
        self.inner.lock().device.clone()
    }

    pub fn is_connected(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == ConnectionState::Connected && inner.link.is_some()
    }

    /// Connect to `device`, replacing any open transport.
    ///
    /// The open runs on a spawned task and completes even if this future is
    /// dropped. A later `connect` or `close` supersedes this attempt: its
    /// result is then discarded and a late transport released.
    pub async fn connect(&self, device: DeviceRef) -> Result<(), SessionError> {
        let generation = {
            let mut inner = self.inner.lock();
            let previous = inner.link.take();
            inner.generation += 1;
            inner.state = ConnectionState::Connecting;
            inner.device = Some(device.clone());
            if let Some(link) = previous {
                info!("Closing previous connection before reconnecting");
                release_link(link);
            }
            inner.generation
        };

        info!("Connecting to {}...", device);
        let session = self.clone();
        tokio::spawn(async move { session.run_attempt(device, generation).await }).await?
    }

    async fn run_attempt(&self, device: DeviceRef, generation: u64) -> Result<(), SessionError> {
        let open = self.provider.open(&device);
        let opened = match self.options.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, open).await {
                Ok(result) => result.map_err(SessionError::ConnectFailed),
                Err(_) => Err(SessionError::ConnectTimedOut(limit)),
            },
            None => open.await.map_err(SessionError::ConnectFailed),
        };

        match opened {
            Ok(stream) => self.install(device, generation, stream),
            Err(err) => {
                let mut inner = self.inner.lock();
                if inner.generation != generation {
                    debug!("Discarding failure of superseded attempt: {}", err);
                    return Err(SessionError::Superseded);
                }
                error!("Connection to {} failed: {}", device, err);
                inner.state = ConnectionState::Failed;
                let _ = self
                    .event_tx
                    .send(SessionEvent::ConnectionFailed(err.to_string()));
                Err(err)
            }
        }
    }

    fn install(
        &self,
        device: DeviceRef,
        generation: u64,
        stream: P::Stream,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            drop(inner);
            debug!("Releasing transport of superseded attempt to {}", device);
            release_stream(stream);
            return Err(SessionError::Superseded);
        }

        let (reader, writer) = tokio::io::split(stream);
        let (cancel, cancelled) = oneshot::channel();

        inner.state = ConnectionState::Connected;
        let _ = self.event_tx.send(SessionEvent::Connected(device.clone()));
        info!("Connected to {}", device);

        // Spawned under the guard so nothing it emits can precede Connected.
        let session = self.clone();
        let reader = tokio::spawn(async move {
            session.read_loop(generation, reader, cancelled).await;
        });

        inner.link = Some(Link {
            generation,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            closing: watch::channel(false).0,
            cancel,
            reader,
        });
        Ok(())
    }

    async fn read_loop(
        self,
        generation: u64,
        mut reader: ReadHalf<P::Stream>,
        mut cancelled: oneshot::Receiver<()>,
    ) {
        debug!("Receive loop started (generation {})", generation);
        let mut buf = vec![0u8; self.options.read_buffer_size.max(1)];

        loop {
            tokio::select! {
                biased;
                _ = &mut cancelled => {
                    debug!("Receive loop cancelled (generation {})", generation);
                    break;
                }
                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        info!("Connection closed by remote");
                        self.end_link(generation, "end of stream".to_string());
                        break;
                    }
                    Ok(n) => {
                        debug!("Received {} bytes", n);
                        let event = SessionEvent::DataReceived(buf[..n].to_vec());
                        if !self.emit_current(generation, event) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Read error: {}", e);
                        self.end_link(generation, e.to_string());
                        break;
                    }
                }
            }
        }
    }

    /// Tear down the link after a receive failure, if it is still current.
    fn end_link(&self, generation: u64, reason: String) {
        let link = {
            let mut inner = self.inner.lock();
            match &inner.link {
                Some(link) if link.generation == generation => {}
                _ => return,
            }
            inner.state = ConnectionState::Closed;
            let _ = self.event_tx.send(SessionEvent::ReadEnded(reason));
            inner.link.take()
        };
        if let Some(link) = link {
            release_link(link);
        }
    }

    /// Emit `event` only while `generation` owns the open link.
    fn emit_current(&self, generation: u64, event: SessionEvent) -> bool {
        let inner = self.inner.lock();
        match &inner.link {
            Some(link) if link.generation == generation => {
                let _ = self.event_tx.send(event);
                true
            }
            _ => false,
        }
    }

    /// Write `payload` whole and flush.
    ///
    /// Empty payloads are a no-op. Writes are serialized, so concurrent
    /// sends never interleave. A failed write is reported but leaves the
    /// session open. A write still pending when the link is torn down is
    /// abandoned with [`SessionError::Closed`] and reports no event.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        let payload = payload.into();
        if payload.is_empty() {
            return Ok(());
        }

        let (generation, writer, mut closing) = {
            let inner = self.inner.lock();
            match &inner.link {
                Some(link) if inner.state == ConnectionState::Connected => (
                    link.generation,
                    link.writer.clone(),
                    link.closing.subscribe(),
                ),
                _ => return Err(SessionError::NotConnected),
            }
        };

        let session = self.clone();
        tokio::spawn(async move {
            let write = async {
                let mut writer = writer.lock().await;
                match writer.write_all(&payload).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                }
            };
            // Dropping `write` releases the writer lock for teardown.
            let written = tokio::select! {
                biased;
                _ = closing.wait_for(|closed| *closed) => None,
                result = write => Some(result),
            };
            match written {
                None => {
                    debug!("Abandoned send of {} bytes, link closed", payload.len());
                    Err(SessionError::Closed)
                }
                Some(Ok(())) => {
                    debug!("Sent {} bytes", payload.len());
                    session.emit_current(generation, SessionEvent::Sent(payload));
                    Ok(())
                }
                Some(Err(e)) => {
                    warn!("Send failed: {}", e);
                    session.emit_current(generation, SessionEvent::SendFailed(e.to_string()));
                    Err(SessionError::SendFailed(e))
                }
            }
        })
        .await?
    }

    /// Close the session. Idempotent.
    ///
    /// Cancels any in-flight connect, signals the receive loop and shuts the
    /// transport down. No events are emitted for this session afterwards
    /// until the next `connect`.
    pub fn close(&self) {
        let link = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.state = ConnectionState::Closed;
            inner.link.take()
        };
        if let Some(link) = link {
            info!("Closing connection");
            release_link(link);
        }
    }
}

/// Signal the receive loop and pending sends, then shut the write side down
/// and drop it.
///
/// The transport itself is released once the receive loop drops its half.
fn release_link<S>(link: Link<S>)
where
    S: tokio::io::AsyncWrite + Send + 'static,
{
    let Link {
        generation,
        writer,
        closing,
        cancel,
        reader,
    } = link;
    closing.send_replace(true);
    let _ = cancel.send(());
    drop(reader);

    match Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                let mut writer = writer.lock().await;
                if let Err(e) = writer.shutdown().await {
                    debug!("Ignoring shutdown error (generation {}): {}", generation, e);
                }
            });
        }
        Err(_) => drop(writer),
    }
}

/// Shut down and drop a transport that never became the session's link.
fn release_stream<S>(mut stream: S)
where
    S: tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    match Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                if let Err(e) = stream.shutdown().await {
                    debug!("Ignoring shutdown error on discarded transport: {}", e);
                }
            });
        }
        Err(_) => drop(stream),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::mock::{MockOutcome, MockProvider};

    fn device() -> DeviceRef {
        DeviceRef::new("98:D3:31:F5:12:34".parse().unwrap(), Some("HC-06".to_string()))
    }

    #[test]
    fn test_decode_text_is_lossy() {
        assert_eq!(decode_text(b"OK\r\n"), "OK\r\n");
        assert_eq!(decode_text(&[b'A', 0xFF, b'B']), "A\u{FFFD}B");
    }

    #[test]
    fn test_event_text() {
        let event = SessionEvent::DataReceived(b"hello".to_vec());
        assert_eq!(event.text().as_deref(), Some("hello"));
        assert!(SessionEvent::ReadEnded("eof".into()).text().is_none());
    }

    #[tokio::test]
    async fn test_new_session_is_idle() {
        let (provider, _peers) = MockProvider::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = SerialSession::new(provider, SessionOptions::default(), tx);

        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(!session.is_connected());
        assert!(session.device().is_none());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (provider, _peers) = MockProvider::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = SerialSession::new(provider, SessionOptions::default(), tx);

        let result = session.send("AT\r\n").await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let (provider, _peers) = MockProvider::new();
        provider.push(MockOutcome::Hang);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = SessionOptions {
            connect_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let session = SerialSession::new(provider, options, tx);

        let result = session.connect(device()).await;
        assert!(matches!(result, Err(SessionError::ConnectTimedOut(_))));
        assert_eq!(session.state(), ConnectionState::Failed);
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_during_connect_discards_attempt() {
        let (provider, mut peers) = MockProvider::new();
        let (gate_tx, gate_rx) = oneshot::channel();
        provider.push(MockOutcome::Gated(gate_rx));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = SerialSession::new(provider, SessionOptions::default(), tx);

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.connect(device()).await }
        });
        while session.state() != ConnectionState::Connecting {
            tokio::task::yield_now().await;
        }
        session.close();
        gate_tx.send(()).unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(SessionError::Superseded)));
        assert_eq!(session.state(), ConnectionState::Closed);

        let peer = peers.recv().await.unwrap();
        peer.wait_released().await;
        assert_eq!(peer.release_count(), 1);
        assert!(rx.try_recv().is_err());
    }
}
