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

//! Heartbeat monitor

use crate::client::ClientInner;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{Instrument, debug, info_span, trace, warn};

/// Start the heartbeat task for a client
///
/// The task only holds a weak reference, so it ends on its own once the
/// last client handle is gone, or when the client's shutdown token fires.
pub(crate) fn spawn(inner: &Arc<ClientInner>, runtime: &Handle) -> JoinHandle<()> {
    let client = Arc::downgrade(inner);
    let period = inner.config.heartbeat_interval;
    let shutdown = inner.shutdown_token().clone();
    let span = info_span!("heartbeat", address = %inner.config.address());

    runtime.spawn(
        async move {
            debug!("Started task 'heartbeat'");
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = client.upgrade() else {
                    break;
                };
                tick(&inner).await;
            }

            debug!("Completed task 'heartbeat'");
        }
        .instrument(span),
    )
}

/// One heartbeat: probe the live connection, reconnect if it is gone or dead
pub(crate) async fn tick(inner: &Arc<ClientInner>) {
    if !inner.heartbeat_enabled() || inner.is_disposed() {
        return;
    }

    match inner.live_epoch() {
        Some(epoch) => {
            let payload = inner.config.heartbeat_payload.as_deref();
            match timeout(inner.config.heartbeat_timeout, epoch.probe(payload)).await {
                Ok(Ok(())) => {
                    trace!(epoch = epoch.id(), "Heartbeat ok");
                    return;
                }
                Ok(Err(error)) => {
                    warn!(epoch = epoch.id(), error = %error, "Heartbeat probe failed");
                }
                Err(_) => {
                    warn!(
                        epoch = epoch.id(),
                        timeout = ?inner.config.heartbeat_timeout,
                        "Heartbeat probe timed out"
                    );
                }
            }
            inner.stats.record_heartbeat_failure();
        }
        None => debug!("No live connection at heartbeat"),
    }

    // Disabled while the probe was running
    if !inner.heartbeat_enabled() {
        return;
    }
    inner.trigger_reconnect().await;
}
