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

//! In-memory transport for tests and dry runs.
//!
//! Each successful open creates a duplex pipe. The session gets one end
//! wrapped in a [`MockStream`]; the other end is handed out as a
//! [`MockPeer`] that plays the remote device.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, oneshot, Notify};

use super::device::DeviceRef;
use super::transport::TransportProvider;

/// Pipe capacity per direction.
const PIPE_CAPACITY: usize = 4096;

/// Scripted result of one `open` call.
#[derive(Debug)]
pub enum MockOutcome {
    /// Open immediately.
    Accept,
    /// Fail with `ConnectionRefused`.
    Refuse(String),
    /// Open once the gate fires (or its sender is dropped).
    Gated(oneshot::Receiver<()>),
    /// Never complete.
    Hang,
}

#[derive(Default)]
struct ReleaseCounter {
    count: AtomicUsize,
    notify: Notify,
}

struct ReleaseGuard(Arc<ReleaseCounter>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.count.fetch_add(1, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }
}

pin_project! {
    /// Session side of a mock connection.
    pub struct MockStream {
        #[pin]
        inner: DuplexStream,
        fault: Option<oneshot::Receiver<()>>,
        faulted: bool,
        fail_writes: Arc<AtomicBool>,
        _guard: ReleaseGuard,
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if let Some(fault) = this.fault.as_mut() {
            match Pin::new(fault).poll(cx) {
                Poll::Ready(Ok(())) => {
                    *this.fault = None;
                    *this.faulted = true;
                }
                Poll::Ready(Err(_)) => *this.fault = None,
                Poll::Pending => {}
            }
        }
        if *this.faulted {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "link lost",
            )));
        }
        this.inner.poll_read(cx, buf)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        if this.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write rejected",
            )));
        }
        this.inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

/// Remote side of a mock connection.
pub struct MockPeer {
    pub device: DeviceRef,
    pub stream: DuplexStream,
    fault: Option<oneshot::Sender<()>>,
    fail_writes: Arc<AtomicBool>,
    released: Arc<ReleaseCounter>,
}

impl MockPeer {
    /// Make the session's next read fail with an I/O error.
    pub fn break_link(&mut self) {
        if let Some(fault) = self.fault.take() {
            let _ = fault.send(());
        }
    }

    /// Make every further session write fail.
    pub fn reject_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// How many times the session side has been dropped.
    pub fn release_count(&self) -> usize {
        self.released.count.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.release_count() > 0
    }

    /// Wait until the session side has been dropped.
    pub async fn wait_released(&self) {
        loop {
            let notified = self.released.notify.notified();
            if self.is_released() {
                return;
            }
            notified.await;
        }
    }
}

/// Transport provider with scripted outcomes.
///
/// Opens with no scripted outcome left succeed.
pub struct MockProvider {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    peer_tx: mpsc::UnboundedSender<MockPeer>,
    opened: AtomicUsize,
}

impl MockProvider {
    /// Create a provider and the receiver its peers are delivered on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let provider = Self {
            outcomes: Mutex::new(VecDeque::new()),
            peer_tx,
            opened: AtomicUsize::new(0),
        };
        (provider, peer_rx)
    }

    /// Queue the outcome of a future `open`.
    pub fn push(&self, outcome: MockOutcome) {
        self.outcomes.lock().push_back(outcome);
    }

    /// Number of `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

fn pair(device: DeviceRef) -> (MockStream, MockPeer) {
    let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
    let (fault_tx, fault_rx) = oneshot::channel();
    let fail_writes = Arc::new(AtomicBool::new(false));
    let released = Arc::new(ReleaseCounter::default());

    let stream = MockStream {
        inner: local,
        fault: Some(fault_rx),
        faulted: false,
        fail_writes: fail_writes.clone(),
        _guard: ReleaseGuard(released.clone()),
    };
    let peer = MockPeer {
        device,
        stream: remote,
        fault: Some(fault_tx),
        fail_writes,
        released,
    };
    (stream, peer)
}

impl TransportProvider for MockProvider {
    type Stream = MockStream;

    fn open(&self, device: &DeviceRef) -> BoxFuture<'static, io::Result<Self::Stream>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcomes.lock().pop_front().unwrap_or(MockOutcome::Accept);
        let device = device.clone();
        let peer_tx = self.peer_tx.clone();

        Box::pin(async move {
            match outcome {
                MockOutcome::Accept => {}
                MockOutcome::Refuse(reason) => {
                    return Err(io::Error::new(io::ErrorKind::ConnectionRefused, reason));
                }
                MockOutcome::Gated(gate) => {
                    let _ = gate.await;
                }
                MockOutcome::Hang => futures::future::pending::<()>().await,
            }
            let (stream, peer) = pair(device);
            let _ = peer_tx.send(peer);
            Ok(stream)
        })
    }
}
