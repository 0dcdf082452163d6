//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! One TCP connection's resources
//!
//! An [`Epoch`] bundles the write stream and the reader's cancellation token
//! of a single connection. It is created once per successful connect and
//! never reused: reconnecting builds a new epoch, so a reader task still
//! holding an old one can only ever close the old socket.

use crate::codec::LineWriter;
use crate::{ClientError, Result};
use futures_util::SinkExt;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct Epoch {
    id: u64,
    peer_addr: SocketAddr,
    cancel: CancellationToken,
    /// Write stream; the mutex is the write lock shared by `send` and the heartbeat
    writer: Mutex<Option<LineWriter>>,
    closed: AtomicBool,
}

impl Epoch {
    pub(crate) fn new(id: u64, peer_addr: SocketAddr, writer: LineWriter) -> Self {
        Self {
            id,
            peer_addr,
            cancel: CancellationToken::new(),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Write one line under the write lock and flush it
    pub(crate) async fn send_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) if self.is_live() => sink.send(line).await,
            _ => Err(ClientError::NotConnected),
        }
    }

    /// Liveness probe, run under the write lock
    ///
    /// Surfaces any error pending on the socket, then writes either the
    /// payload line or zero bytes and flushes.
    pub(crate) async fn probe(&self, payload: Option<&str>) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let sink = match writer.as_mut() {
            Some(sink) if self.is_live() => sink,
            _ => return Err(ClientError::NotConnected),
        };

        if let Some(error) = sink.get_ref().as_ref().take_error()? {
            return Err(error.into());
        }

        match payload {
            Some(line) => sink.send(line).await,
            None => {
                sink.get_mut().write_all(&[]).await?;
                SinkExt::<&str>::flush(sink).await
            }
        }
    }

    /// Release this epoch's resources
    ///
    /// Cancels the reader first, then shuts the write stream down. Only the
    /// first call does anything; it returns `false` for every later call. The
    /// socket itself closes once the reader task drops the read half.
    pub(crate) async fn close(&self, grace: Duration) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        debug!(epoch = self.id, peer_addr = %self.peer_addr, "Closing epoch");
        self.cancel.cancel();

        match timeout(grace, self.writer.lock()).await {
            Ok(mut writer) => {
                if let Some(mut sink) = writer.take() {
                    match timeout(grace, SinkExt::<&str>::close(&mut sink)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => {
                            warn!(epoch = self.id, error = %error, "Failed to close write stream");
                        }
                        Err(_) => {
                            warn!(epoch = self.id, "Timed out closing write stream");
                        }
                    }
                }
            }
            Err(_) => {
                // The stream is dropped along with the last reference to the epoch
                warn!(epoch = self.id, "Write lock busy, leaving write stream to be dropped");
            }
        }
        true
    }

    #[cfg(test)]
    pub(crate) async fn lock_writer(&self) -> tokio::sync::MutexGuard<'_, Option<LineWriter>> {
        self.writer.lock().await
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Epoch")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("live", &self.is_live())
            .finish()
    }
}
