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

//! Client error types

use thiserror::Error;

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client has been disposed and can no longer be used
    #[error("Client has been disposed")]
    Disposed,

    /// No live connection exists
    #[error("Not connected")]
    NotConnected,

    /// Opening the connection took longer than the configured timeout
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// I/O error from the underlying TCP stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection validator rejected the peer
    #[error("Connection validation failed: {0}")]
    Validation(String),

    /// An inbound line exceeded the configured maximum length
    #[error("Line exceeds maximum length of {0} bytes")]
    LineTooLong(usize),
}

impl ClientError {
    /// Build a validation failure with the given reason
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Check if the error is recoverable
    ///
    /// Recoverable errors end the current connection but not the client: a
    /// fresh connection may succeed. This covers every connection error plus
    /// an oversized line, which only poisons the stream it arrived on.
    pub fn is_recoverable(&self) -> bool {
        self.is_connection_error() || matches!(self, ClientError::LineTooLong(_))
    }

    /// Check if the error describes a broken or missing connection
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::NotConnected | ClientError::ConnectTimeout(_) | ClientError::Io(_)
        )
    }

    /// Fold any error raised while validating into a [`ClientError::Validation`]
    pub(crate) fn into_validation(self) -> Self {
        match self {
            ClientError::Validation(reason) => ClientError::Validation(reason),
            other => ClientError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_is_recoverable() {
        assert!(ClientError::NotConnected.is_recoverable());
        assert!(ClientError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_recoverable());
        assert!(ClientError::LineTooLong(16).is_recoverable());
        assert!(!ClientError::Disposed.is_recoverable());
        assert!(!ClientError::validation("bad banner").is_recoverable());
    }

    #[test]
    fn test_error_is_connection_error() {
        assert!(ClientError::ConnectTimeout("10.0.0.1:23".into()).is_connection_error());
        assert!(!ClientError::LineTooLong(16).is_connection_error());
        assert!(!ClientError::Disposed.is_connection_error());
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::ConnectTimeout("avr.local:23".to_string());
        assert_eq!(err.to_string(), "Connection to avr.local:23 timed out");

        let err = ClientError::LineTooLong(1024);
        assert_eq!(err.to_string(), "Line exceeds maximum length of 1024 bytes");
    }

    #[test]
    fn test_into_validation_keeps_reason() {
        let err = ClientError::validation("unexpected banner").into_validation();
        assert_eq!(
            err.to_string(),
            "Connection validation failed: unexpected banner"
        );

        let err = ClientError::NotConnected.into_validation();
        assert!(matches!(err, ClientError::Validation(ref reason) if reason == "Not connected"));
    }
}
