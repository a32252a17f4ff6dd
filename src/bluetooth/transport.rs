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

//! Byte-stream transports to a remote SPP peer.

use bluer::rfcomm::{Profile, ProfileHandle, Role, SocketAddr, Stream};
use bluer::{Adapter, Session};
use futures::future::BoxFuture;
use futures::StreamExt;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

use super::device::{DeviceRef, SPP_UUID};

/// Opens byte-stream channels to remote devices.
///
/// Opening may block for as long as the peer takes to answer; callers run
/// it on a worker task.
pub trait TransportProvider: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open a reliable, ordered, bidirectional stream to `device`.
    fn open(&self, device: &DeviceRef) -> BoxFuture<'static, io::Result<Self::Stream>>;
}

impl<T: TransportProvider> TransportProvider for Arc<T> {
    type Stream = T::Stream;

    fn open(&self, device: &DeviceRef) -> BoxFuture<'static, io::Result<Self::Stream>> {
        (**self).open(device)
    }
}

pin_project! {
    /// RFCOMM stream, together with the profile registration it came from.
    pub struct RfcommStream {
        #[pin]
        stream: Stream,
        _profile: Option<ProfileHandle>,
    }
}

impl RfcommStream {
    fn direct(stream: Stream) -> Self {
        Self {
            stream,
            _profile: None,
        }
    }

    fn with_profile(stream: Stream, profile: ProfileHandle) -> Self {
        Self {
            stream,
            _profile: Some(profile),
        }
    }
}

impl AsyncRead for RfcommStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().stream.poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().stream.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_shutdown(cx)
    }
}

/// RFCOMM transport backed by BlueZ.
///
/// Without a fixed channel the SPP service is resolved by UUID through a
/// client profile registration; with one, the socket connects directly.
#[derive(Clone)]
pub struct RfcommProvider {
    session: Session,
    adapter: Adapter,
    channel: Option<u8>,
}

impl RfcommProvider {
    pub fn new(session: Session, adapter: Adapter, channel: Option<u8>) -> Self {
        Self {
            session,
            adapter,
            channel,
        }
    }

    async fn connect_channel(device: DeviceRef, channel: u8) -> io::Result<RfcommStream> {
        info!("Opening RFCOMM channel {} on {}", channel, device.address);
        let stream = Stream::connect(SocketAddr::new(device.address, channel)).await?;
        Ok(RfcommStream::direct(stream))
    }

    async fn connect_service(
        session: Session,
        adapter: Adapter,
        device: DeviceRef,
    ) -> io::Result<RfcommStream> {
        info!("Resolving SPP service ({}) on {}", SPP_UUID, device.address);

        let profile = Profile {
            uuid: SPP_UUID,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = session.register_profile(profile).await.map_err(io::Error::other)?;
        let remote = adapter.device(device.address).map_err(io::Error::other)?;

        // BlueZ hands the socket to the profile before ConnectProfile returns.
        let connect = remote.connect_profile(&SPP_UUID);
        tokio::pin!(connect);
        let request = tokio::select! {
            res = &mut connect => {
                res.map_err(io::Error::other)?;
                handle.next().await
            }
            req = handle.next() => req,
        };
        let request = request.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "profile closed before connecting")
        })?;
        debug!("SPP connection request from {}", request.device());

        let stream = request.accept().map_err(io::Error::other)?;
        Ok(RfcommStream::with_profile(stream, handle))
    }
}

impl TransportProvider for RfcommProvider {
    type Stream = RfcommStream;

    fn open(&self, device: &DeviceRef) -> BoxFuture<'static, io::Result<Self::Stream>> {
        let device = device.clone();
        match self.channel {
            Some(channel) => Box::pin(Self::connect_channel(device, channel)),
            None => Box::pin(Self::connect_service(
                self.session.clone(),
                self.adapter.clone(),
                device,
            )),
        }
    }
}
