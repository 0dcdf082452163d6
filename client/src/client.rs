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

//! Reconnecting line client implementation

use crate::codec::LineCodec;
use crate::epoch::Epoch;
use crate::handler::{CallbackHandler, HandlerRegistry};
use crate::reader::ReaderLoop;
use crate::stats::StatsCounters;
use crate::{
    ClientConfig, ClientError, ClientStats, ConnectPolicy, ConnectionValidator, HandlerId,
    Handshake, LineHandler, Result, heartbeat,
};
use futures_util::SinkExt;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// What started a connect sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectOrigin {
    /// An explicit call to `connect`
    Connect,
    /// The heartbeat found the connection dead
    Heartbeat,
}

impl fmt::Display for ReconnectOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectOrigin::Connect => write!(f, "connect"),
            ReconnectOrigin::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// The current epoch together with the task reading from it
struct ActiveEpoch {
    epoch: Arc<Epoch>,
    reader: JoinHandle<()>,
}

/// Reconnecting line-oriented TCP client
///
/// Cloning a `LineClient` yields another handle to the same connection.
/// The connection is torn down by [`dispose`](Self::dispose), or when the
/// last handle is dropped.
#[derive(Clone)]
pub struct LineClient {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    auto_reconnect: AtomicBool,
    disposed: AtomicBool,
    heartbeat_enabled: AtomicBool,
    current: Mutex<Option<ActiveEpoch>>,
    /// Serializes teardown and connect sequences; never held while taking the write lock
    pub(crate) reset_lock: tokio::sync::Mutex<()>,
    /// Bumped after every completed connect sequence
    pub(crate) reconnect_seq: AtomicU64,
    next_epoch: AtomicU64,
    validator: RwLock<Option<Arc<dyn ConnectionValidator>>>,
    handlers: Arc<HandlerRegistry>,
    pub(crate) stats: Arc<StatsCounters>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl LineClient {
    /// Create a client for the configured address. Nothing is opened until
    /// [`connect`](Self::connect) is called.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                auto_reconnect: AtomicBool::new(config.auto_reconnect),
                config,
                disposed: AtomicBool::new(false),
                heartbeat_enabled: AtomicBool::new(false),
                current: Mutex::new(None),
                reset_lock: tokio::sync::Mutex::new(()),
                reconnect_seq: AtomicU64::new(0),
                next_epoch: AtomicU64::new(0),
                validator: RwLock::new(None),
                handlers: Arc::new(HandlerRegistry::default()),
                stats: Arc::new(StatsCounters::default()),
                heartbeat_task: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open the connection
    ///
    /// Failing to reach the device is not an error: it is logged and the
    /// client stays disconnected (with auto-reconnect, the heartbeat keeps
    /// trying once a connection has been made). The only failures returned
    /// are [`ClientError::Disposed`] and a [`ClientError::Validation`] raised
    /// by the validator.
    #[instrument(skip(self), fields(address = %self.inner.config.address()))]
    pub async fn connect(&self) -> Result<()> {
        self.inner.ensure_not_disposed()?;
        let _reset = self.inner.reset_lock.lock().await;
        self.inner.ensure_not_disposed()?;

        if self.inner.config.connect_policy == ConnectPolicy::ReuseExisting
            && self.inner.is_connected()
        {
            debug!("Already connected, keeping the existing connection");
            return Ok(());
        }

        self.inner.reconnect_locked(ReconnectOrigin::Connect).await
    }

    /// Send one line to the device
    ///
    /// The text is written unchanged, followed by the configured line ending,
    /// and flushed before this returns.
    pub async fn send(&self, message: &str) -> Result<()> {
        self.inner.ensure_not_disposed()?;
        let epoch = self.inner.live_epoch().ok_or(ClientError::NotConnected)?;

        trace!(epoch = epoch.id(), message = ?message, "Sending line");
        match epoch.send_line(message).await {
            Ok(()) => {
                self.inner.stats.record_line_sent();
                Ok(())
            }
            Err(ClientError::NotConnected) => Err(ClientError::NotConnected),
            Err(error) => {
                self.inner.stats.record_send_error();
                warn!(epoch = epoch.id(), error = %error, "Failed to send line");
                Err(error)
            }
        }
    }

    /// Close the connection and stop the heartbeat
    ///
    /// Calling this while already disconnected does nothing.
    #[instrument(skip(self), fields(address = %self.inner.config.address()))]
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.ensure_not_disposed()?;
        self.inner.disable_heartbeat();

        let _reset = self.inner.reset_lock.lock().await;
        // A reconnect that held the lock may have switched it back on
        self.inner.disable_heartbeat();
        self.inner.teardown_locked().await;
        info!("Disconnected");
        Ok(())
    }

    /// Shut the client down for good
    ///
    /// Stops the heartbeat and closes the connection. Every later call to
    /// `connect`, `send` or `disconnect` fails with [`ClientError::Disposed`].
    /// Calling it again does nothing.
    #[instrument(skip(self), fields(address = %self.inner.config.address()))]
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.disable_heartbeat();
        self.inner.shutdown.cancel();

        let _reset = self.inner.reset_lock.lock().await;
        self.inner.disable_heartbeat();
        self.inner.teardown_locked().await;

        let heartbeat = self
            .inner
            .heartbeat_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = heartbeat {
            task.abort();
        }
        info!("Disposed");
    }

    /// Register a handler for received lines
    pub fn add_handler(&self, handler: Arc<dyn LineHandler>) -> HandlerId {
        self.inner.handlers.add(handler)
    }

    /// Register a closure for received lines
    pub fn on_line<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.add_handler(Arc::new(CallbackHandler::new(callback)))
    }

    /// Remove a handler, returning whether it was registered
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.remove(id)
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.len()
    }

    /// Set the validator run on every new connection
    pub fn set_validator(&self, validator: Arc<dyn ConnectionValidator>) {
        *self
            .inner
            .validator
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(validator);
    }

    /// Remove the validator
    pub fn clear_validator(&self) {
        *self
            .inner
            .validator
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Turn automatic reconnection on or off
    ///
    /// Turning it on while connected starts the heartbeat right away.
    /// Turning it off stops the heartbeat; a lost connection then stays lost
    /// until `connect` is called.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.auto_reconnect.store(enabled, Ordering::Release);
        if !enabled {
            self.inner.disable_heartbeat();
        } else if self.inner.is_connected() && !self.inner.is_disposed() {
            self.inner.enable_heartbeat();
        }
    }

    pub fn auto_reconnect(&self) -> bool {
        self.inner.auto_reconnect.load(Ordering::Acquire)
    }

    /// Whether a live connection exists
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Address of the device while connected
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.live_epoch().map(|epoch| epoch.peer_addr())
    }

    /// Snapshot of the connection counters
    pub fn stats(&self) -> ClientStats {
        self.inner.stats.snapshot()
    }
}

impl fmt::Debug for LineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineClient")
            .field("address", &self.inner.config.address())
            .field("connected", &self.is_connected())
            .field("auto_reconnect", &self.auto_reconnect())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ClientInner {
    fn ensure_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(ClientError::Disposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn heartbeat_enabled(&self) -> bool {
        self.heartbeat_enabled.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn current(&self) -> MutexGuard<'_, Option<ActiveEpoch>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn live_epoch(&self) -> Option<Arc<Epoch>> {
        self.current()
            .as_ref()
            .filter(|active| active.epoch.is_live())
            .map(|active| Arc::clone(&active.epoch))
    }

    fn is_connected(&self) -> bool {
        self.live_epoch().is_some()
    }

    fn validator(&self) -> Option<Arc<dyn ConnectionValidator>> {
        self.validator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn enable_heartbeat(self: &Arc<Self>) {
        self.heartbeat_enabled.store(true, Ordering::Release);

        let mut task = self
            .heartbeat_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_none_or(|handle| handle.is_finished()) {
            match Handle::try_current() {
                Ok(runtime) => *task = Some(heartbeat::spawn(self, &runtime)),
                Err(_) => debug!("No runtime available, heartbeat starts on next connect"),
            }
        }
    }

    fn disable_heartbeat(&self) {
        self.heartbeat_enabled.store(false, Ordering::Release);
    }

    /// Heartbeat entry point for replacing a dead connection
    ///
    /// Triggers that arrive while another sequence is running wait for it and
    /// then return without starting one of their own.
    pub(crate) async fn trigger_reconnect(self: &Arc<Self>) {
        let observed = self.reconnect_seq.load(Ordering::Acquire);
        let _reset = self.reset_lock.lock().await;

        if self.reconnect_seq.load(Ordering::Acquire) != observed {
            debug!("Connection replaced while waiting, skipping reconnect");
            return;
        }
        if self.is_disposed() || !self.heartbeat_enabled() {
            debug!("Heartbeat stopped while waiting, skipping reconnect");
            return;
        }

        self.stats.record_reconnect();
        info!(address = %self.config.address(), "Reconnecting");
        if let Err(error) = self.reconnect_locked(ReconnectOrigin::Heartbeat).await {
            warn!(error = %error, "Automatic reconnect failed");
        }
    }

    /// Tear down and connect again. The caller holds `reset_lock`.
    async fn reconnect_locked(self: &Arc<Self>, origin: ReconnectOrigin) -> Result<()> {
        debug!(%origin, "Starting connect sequence");
        self.teardown_locked().await;
        let result = self.establish().await;
        self.reconnect_seq.fetch_add(1, Ordering::AcqRel);
        result
    }

    async fn establish(self: &Arc<Self>) -> Result<()> {
        let address = self.config.address();
        self.stats.record_connect_attempt();
        info!(%address, "Connecting");

        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(&address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => {
                self.stats.record_connect_failure();
                info!(%address, error = %error, "Connection attempt failed");
                return Ok(());
            }
            Err(_) => {
                self.stats.record_connect_failure();
                let error = ClientError::ConnectTimeout(address.clone());
                info!(%address, error = %error, "Connection attempt failed");
                return Ok(());
            }
        };

        let peer_addr = match stream.peer_addr() {
            Ok(peer_addr) => peer_addr,
            Err(error) => {
                self.stats.record_connect_failure();
                warn!(%address, error = %error, "Connection dropped before it was usable");
                return Ok(());
            }
        };
        if let Err(error) = stream.set_nodelay(true) {
            debug!(error = %error, "Failed to set TCP_NODELAY");
        }

        let codec = LineCodec::new(self.config.line_ending, self.config.max_line_length);
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, codec.clone());
        let mut writer = FramedWrite::new(write_half, codec);

        if let Some(validator) = self.validator() {
            let client = LineClient {
                inner: Arc::clone(self),
            };
            let mut handshake = Handshake::new(&mut reader, &mut writer, peer_addr);
            if let Err(error) = validator.validate(&client, &mut handshake).await {
                self.stats.record_validation_failure();
                warn!(%peer_addr, error = %error, "Connection rejected by validator");
                match timeout(
                    self.config.teardown_timeout,
                    SinkExt::<&str>::close(&mut writer),
                )
                .await
                {
                    Ok(Err(close_error)) => {
                        warn!(error = %close_error, "Failed to close rejected connection")
                    }
                    Err(_) => warn!("Timed out closing rejected connection"),
                    Ok(Ok(())) => {}
                }
                return Err(error.into_validation());
            }
            debug!(%peer_addr, "Connection validated");
        }

        let id = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let epoch = Arc::new(Epoch::new(id, peer_addr, writer));
        let reader = ReaderLoop::new(
            Arc::clone(&epoch),
            reader,
            Arc::clone(&self.handlers),
            Arc::clone(&self.stats),
            self.config.teardown_timeout,
        )
        .spawn();
        *self.current() = Some(ActiveEpoch { epoch, reader });

        self.stats.record_connect();
        info!(epoch = id, %peer_addr, "Connected");

        if self.auto_reconnect.load(Ordering::Acquire) && !self.is_disposed() {
            self.enable_heartbeat();
        }
        Ok(())
    }

    /// Release the current epoch, if any. The caller holds `reset_lock`.
    ///
    /// Every step runs even when an earlier one fails or times out.
    async fn teardown_locked(&self) {
        let Some(ActiveEpoch { epoch, mut reader }) = self.current().take() else {
            return;
        };

        debug!(epoch = epoch.id(), "Tearing down connection");
        epoch.close(self.config.teardown_timeout).await;

        match timeout(self.config.teardown_timeout, &mut reader).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) if error.is_panic() => {
                warn!(epoch = epoch.id(), "Reader task panicked");
            }
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(epoch = epoch.id(), "Reader task did not stop in time, aborting");
                reader.abort();
            }
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let current = self
            .current
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(active) = current {
            // The reader closes the write half and the socket on its way out
            active.epoch.cancel_token().cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::sleep;
    use tracing_test::traced_test;

    /// Accepts every connection after a delay
    struct SlowValidator(Duration);

    #[async_trait]
    impl ConnectionValidator for SlowValidator {
        async fn validate(&self, _client: &LineClient, _handshake: &mut Handshake<'_>) -> Result<()> {
            sleep(self.0).await;
            Ok(())
        }
    }

    async fn counting_listener() -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                sockets.push(socket);
            }
        });
        (addr, accepted)
    }

    fn config_for(addr: SocketAddr) -> ClientConfig {
        ClientConfig::new(addr.ip().to_string(), addr.port())
            .with_heartbeat_interval(Duration::from_secs(3600))
            .with_connect_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    #[traced_test]
    async fn test_refused_connection_is_absorbed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = LineClient::new(config_for(addr));
        client.connect().await.unwrap();

        assert!(!client.is_connected());
        assert_eq!(client.stats().connect_failures, 1);
        assert!(logs_contain("Connection attempt failed"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_reconnect_triggers_collapse() {
        let (addr, accepted) = counting_listener().await;
        let client = LineClient::new(config_for(addr).with_auto_reconnect(true));
        client.connect().await.unwrap();
        assert!(client.inner.heartbeat_enabled());

        let inner = client.inner.clone();
        let seq_before = inner.reconnect_seq.load(Ordering::SeqCst);

        let reset = inner.reset_lock.lock().await;
        let first = tokio::spawn({
            let inner = inner.clone();
            async move { inner.trigger_reconnect().await }
        });
        let second = tokio::spawn({
            let inner = inner.clone();
            async move { inner.trigger_reconnect().await }
        });
        sleep(Duration::from_millis(100)).await;
        drop(reset);

        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(inner.reconnect_seq.load(Ordering::SeqCst), seq_before + 1);
        let stats = client.stats();
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.connect_attempts, 2);
        assert!(client.is_connected());

        sleep(Duration::from_millis(50)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        client.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disconnect_during_reconnect_keeps_heartbeat_off() {
        let (addr, accepted) = counting_listener().await;
        let client = LineClient::new(config_for(addr).with_auto_reconnect(true));
        client.connect().await.unwrap();
        client.set_validator(Arc::new(SlowValidator(Duration::from_millis(300))));

        let inner = client.inner.clone();
        let reconnect = tokio::spawn({
            let inner = inner.clone();
            async move { inner.trigger_reconnect().await }
        });
        sleep(Duration::from_millis(100)).await;

        // Waits for the reconnect above, which re-enables the heartbeat
        client.disconnect().await.unwrap();
        reconnect.await.unwrap();

        assert!(!client.is_connected());
        assert!(!inner.heartbeat_enabled());

        heartbeat::tick(&inner).await;

        assert!(!client.is_connected());
        let stats = client.stats();
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.connect_attempts, 2);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_during_reconnect_keeps_heartbeat_off() {
        let (addr, _accepted) = counting_listener().await;
        let client = LineClient::new(config_for(addr).with_auto_reconnect(true));
        client.connect().await.unwrap();
        client.set_validator(Arc::new(SlowValidator(Duration::from_millis(300))));

        let inner = client.inner.clone();
        let reconnect = tokio::spawn({
            let inner = inner.clone();
            async move { inner.trigger_reconnect().await }
        });
        sleep(Duration::from_millis(100)).await;

        client.dispose().await;
        reconnect.await.unwrap();

        assert!(!client.is_connected());
        assert!(!inner.heartbeat_enabled());
        heartbeat::tick(&inner).await;
        assert!(!client.is_connected());
        assert_eq!(client.stats().connect_attempts, 2);
    }

    #[tokio::test]
    async fn test_trigger_after_disconnect_is_ignored() {
        let (addr, _accepted) = counting_listener().await;
        let client = LineClient::new(config_for(addr).with_auto_reconnect(true));
        client.connect().await.unwrap();
        client.disconnect().await.unwrap();

        client.inner.trigger_reconnect().await;

        assert!(!client.is_connected());
        assert_eq!(client.stats().reconnects, 0);
    }

    #[tokio::test]
    async fn test_set_auto_reconnect_toggles_heartbeat() {
        let (addr, _accepted) = counting_listener().await;
        let client = LineClient::new(config_for(addr));
        client.connect().await.unwrap();
        assert!(!client.inner.heartbeat_enabled());

        client.set_auto_reconnect(true);
        assert!(client.auto_reconnect());
        assert!(client.inner.heartbeat_enabled());

        client.set_auto_reconnect(false);
        assert!(!client.inner.heartbeat_enabled());
        client.dispose().await;
    }

    #[tokio::test]
    async fn test_drop_releases_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = LineClient::new(config_for(addr));
        client.connect().await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        drop(client);

        let mut buf = [0u8; 1];
        let read = timeout(
            Duration::from_secs(2),
            tokio::io::AsyncReadExt::read(&mut server, &mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(read, 0);
    }
}
