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

//! Connection counters

use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the client's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Connection attempts, successful or not
    pub connect_attempts: u64,
    /// Connections that completed validation and started reading
    pub connects: u64,
    /// Attempts that failed to open a socket
    pub connect_failures: u64,
    /// Connections rejected by the validator
    pub validation_failures: u64,
    /// Reconnect sequences started by the heartbeat
    pub reconnects: u64,
    /// Heartbeat probes that failed or timed out
    pub heartbeat_failures: u64,
    /// Non-blank lines delivered to handlers
    pub lines_received: u64,
    /// Lines written by `send`
    pub lines_sent: u64,
    /// `send` calls that failed on the stream
    pub send_errors: u64,
}

/// Lock-free counters shared between the client and its tasks
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    connect_attempts: AtomicU64,
    connects: AtomicU64,
    connect_failures: AtomicU64,
    validation_failures: AtomicU64,
    reconnects: AtomicU64,
    heartbeat_failures: AtomicU64,
    lines_received: AtomicU64,
    lines_sent: AtomicU64,
    send_errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        counter!("tetherline.connects.attempted").increment(1);
    }

    pub(crate) fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
        counter!("tetherline.connects.total").increment(1);
    }

    pub(crate) fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
        counter!("tetherline.connects.failed").increment(1);
    }

    pub(crate) fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
        counter!("tetherline.validation.failures").increment(1);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        counter!("tetherline.reconnects.total").increment(1);
    }

    pub(crate) fn record_heartbeat_failure(&self) {
        self.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
        counter!("tetherline.heartbeat.failures").increment(1);
    }

    pub(crate) fn record_line_received(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
        counter!("tetherline.lines.received").increment(1);
    }

    pub(crate) fn record_line_sent(&self) {
        self.lines_sent.fetch_add(1, Ordering::Relaxed);
        counter!("tetherline.lines.sent").increment(1);
    }

    pub(crate) fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
        counter!("tetherline.errors.send").increment(1);
    }

    pub(crate) fn snapshot(&self) -> ClientStats {
        ClientStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
            lines_received: self.lines_received.load(Ordering::Relaxed),
            lines_sent: self.lines_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}
