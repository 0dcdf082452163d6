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

//! Client configuration

use std::time::Duration;

/// Terminator appended to every outbound line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    /// `\n`
    #[default]
    Lf,
    /// `\r\n`
    CrLf,
}

impl LineEnding {
    /// Bytes written after each line
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::Lf => b"\n",
            LineEnding::CrLf => b"\r\n",
        }
    }
}

/// Behavior of [`connect`](crate::LineClient::connect) when a live
/// connection already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectPolicy {
    /// Keep the live connection and return immediately
    #[default]
    ReuseExisting,
    /// Tear the live connection down and connect again, re-running validation
    AlwaysReconnect,
}

/// Line client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device hostname or IP address
    pub host: String,

    /// Device port
    pub port: u16,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Reconnect automatically when the heartbeat finds the connection dead
    pub auto_reconnect: bool,

    /// Interval between heartbeat probes
    pub heartbeat_interval: Duration,

    /// Upper bound on a single heartbeat probe, including the wait for the write lock
    pub heartbeat_timeout: Duration,

    /// Line written as the heartbeat probe (None for a zero-length write)
    pub heartbeat_payload: Option<String>,

    /// Terminator appended to outbound lines
    pub line_ending: LineEnding,

    /// Longest inbound line accepted, in bytes, excluding the terminator
    pub max_line_length: usize,

    /// Behavior of `connect` while already connected
    pub connect_policy: ConnectPolicy,

    /// Grace period for each step of tearing a connection down
    pub teardown_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 23,
            connect_timeout: Duration::from_secs(5),
            auto_reconnect: false,
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(5),
            heartbeat_payload: None,
            line_ending: LineEnding::Lf,
            max_line_length: 64 * 1024,
            connect_policy: ConnectPolicy::ReuseExisting,
            teardown_timeout: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    /// Create a new client configuration with the given host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable automatic reconnection
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the heartbeat probe timeout
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Send a line as the heartbeat probe instead of a zero-length write
    pub fn with_heartbeat_payload(mut self, payload: Option<String>) -> Self {
        self.heartbeat_payload = payload;
        self
    }

    /// Set the outbound line terminator
    pub fn with_line_ending(mut self, ending: LineEnding) -> Self {
        self.line_ending = ending;
        self
    }

    /// Set the maximum inbound line length
    pub fn with_max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = length;
        self
    }

    /// Set the behavior of `connect` while already connected
    pub fn with_connect_policy(mut self, policy: ConnectPolicy) -> Self {
        self.connect_policy = policy;
        self
    }

    /// Set the teardown grace period
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Get the device address as a string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 23);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.connect_policy, ConnectPolicy::ReuseExisting);
        assert!(!config.auto_reconnect);
        assert!(config.heartbeat_payload.is_none());
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("192.168.1.40", 4998)
            .with_auto_reconnect(true)
            .with_line_ending(LineEnding::CrLf)
            .with_connect_policy(ConnectPolicy::AlwaysReconnect)
            .with_heartbeat_payload(Some("PING".into()));

        assert_eq!(config.address(), "192.168.1.40:4998");
        assert!(config.auto_reconnect);
        assert_eq!(config.line_ending.as_bytes(), b"\r\n");
        assert_eq!(config.connect_policy, ConnectPolicy::AlwaysReconnect);
        assert_eq!(config.heartbeat_payload.as_deref(), Some("PING"));
    }
}
