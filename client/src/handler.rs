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

//! Line handler and connection validator traits

use crate::codec::{LineReader, LineWriter};
use crate::{LineClient, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Receives lines read from the device
///
/// Handlers are called from the connection's reader task, one at a time and
/// in registration order. A slow handler delays delivery of later lines.
/// Calling [`LineClient::disconnect`] directly from a handler makes the
/// teardown wait on the reader task running that handler; spawn a task for
/// it instead.
///
/// # Example
///
/// ```no_run
/// use tetherline_client::LineHandler;
/// use async_trait::async_trait;
///
/// struct PrintHandler;
///
/// #[async_trait]
/// impl LineHandler for PrintHandler {
///     async fn on_line(&self, line: &str) {
///         println!("device: {}", line);
///     }
/// }
/// ```
#[async_trait]
pub trait LineHandler: Send + Sync + 'static {
    /// Called once for every non-blank line, terminator removed
    async fn on_line(&self, line: &str);
}

/// Closure-based [`LineHandler`]
pub struct CallbackHandler<F> {
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(&str) + Send + Sync + 'static,
{
    /// Wrap a closure
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> LineHandler for CallbackHandler<F>
where
    F: Fn(&str) + Send + Sync + 'static,
{
    async fn on_line(&self, line: &str) {
        (self.callback)(line);
    }
}

/// Identifies a registered handler so it can be removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Registration-ordered list of line handlers
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(HandlerId, Arc<dyn LineHandler>)>>,
}

impl HandlerRegistry {
    pub(crate) fn add(&self, handler: Arc<dyn LineHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Copy of the current handlers, so none of them runs under the lock
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn LineHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    /// Deliver a line to every handler in registration order
    pub(crate) async fn dispatch(&self, line: &str) {
        for handler in self.snapshot() {
            handler.on_line(line).await;
        }
    }
}

/// Checks a freshly opened connection before lines are dispatched
///
/// Runs once per connection, including every automatic reconnect. Returning
/// an error closes the connection and makes [`LineClient::connect`] fail with
/// [`ClientError::Validation`](crate::ClientError::Validation). The validator
/// runs while the client holds its connection lock, so it must not call
/// `connect` or `disconnect` on the client it is given.
///
/// # Example
///
/// ```no_run
/// use tetherline_client::{ClientError, ConnectionValidator, Handshake, LineClient, Result};
/// use async_trait::async_trait;
///
/// struct BannerCheck;
///
/// #[async_trait]
/// impl ConnectionValidator for BannerCheck {
///     async fn validate(&self, _client: &LineClient, handshake: &mut Handshake<'_>) -> Result<()> {
///         handshake.write_line("ID?").await?;
///         match handshake.read_line().await? {
///             Some(reply) if reply.starts_with("ID ") => Ok(()),
///             other => Err(ClientError::validation(format!("unexpected reply {:?}", other))),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait ConnectionValidator: Send + Sync + 'static {
    /// Inspect the connection, returning an error to reject it
    async fn validate(&self, client: &LineClient, handshake: &mut Handshake<'_>) -> Result<()>;
}

/// Raw access to a connection during validation
///
/// Lines read here are consumed by the validator and never reach the
/// registered handlers.
pub struct Handshake<'a> {
    reader: &'a mut LineReader,
    writer: &'a mut LineWriter,
    peer_addr: SocketAddr,
}

impl<'a> Handshake<'a> {
    pub(crate) fn new(
        reader: &'a mut LineReader,
        writer: &'a mut LineWriter,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            reader,
            writer,
            peer_addr,
        }
    }

    /// Address of the device
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read the next line, blank lines included
    ///
    /// Returns `None` when the device closed the connection.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        self.reader.next().await.transpose()
    }

    /// Write a line and flush it
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.send(line).await
    }
}

impl fmt::Debug for Handshake<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LineHandler for Recorder {
        async fn on_line(&self, line: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, line));
        }
    }

    #[tokio::test]
    async fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HandlerRegistry::default();
        registry.add(Arc::new(Recorder {
            name: "a",
            log: log.clone(),
        }));
        registry.add(Arc::new(Recorder {
            name: "b",
            log: log.clone(),
        }));

        registry.dispatch("PWR ON").await;
        registry.dispatch("MUTE OFF").await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:PWR ON", "b:PWR ON", "a:MUTE OFF", "b:MUTE OFF"]
        );
    }

    #[tokio::test]
    async fn test_remove_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HandlerRegistry::default();
        let first = registry.add(Arc::new(Recorder {
            name: "a",
            log: log.clone(),
        }));
        registry.add(Arc::new(CallbackHandler::new({
            let log = log.clone();
            move |line: &str| log.lock().unwrap().push(format!("cb:{}", line))
        })));

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        assert_eq!(registry.len(), 1);

        registry.dispatch("SRATE 48000").await;
        assert_eq!(*log.lock().unwrap(), vec!["cb:SRATE 48000"]);
    }

    #[test]
    fn test_handler_id_display() {
        assert_eq!(HandlerId(7).to_string(), "handler-7");
    }
}
