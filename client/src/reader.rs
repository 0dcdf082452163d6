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

//! Reader loop
//!
//! One reader task runs per epoch. It owns the read half of the socket and
//! an `Arc` of its epoch, both handed over at spawn time, and never looks at
//! the client's current connection. When it stops, for whatever reason, it
//! closes its own epoch so a dead socket is released without waiting for
//! the next heartbeat.

use crate::ClientError;
use crate::codec::LineReader;
use crate::epoch::Epoch;
use crate::handler::HandlerRegistry;
use crate::stats::StatsCounters;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, trace, warn};

/// Result of a single read from the device
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// A complete line, terminator removed
    Line(String),
    /// The device closed the connection
    EndOfStream,
    /// The stream failed
    Failed(ClientError),
}

/// Read the next line as an explicit outcome
pub(crate) async fn read_next(reader: &mut LineReader) -> ReadOutcome {
    match reader.next().await {
        Some(Ok(line)) => ReadOutcome::Line(line),
        Some(Err(error)) => ReadOutcome::Failed(error),
        None => ReadOutcome::EndOfStream,
    }
}

/// Why the reader loop stopped
#[derive(Debug)]
enum ExitReason {
    Cancelled,
    EndOfStream,
    Failed(ClientError),
}

pub(crate) struct ReaderLoop {
    epoch: Arc<Epoch>,
    reader: LineReader,
    handlers: Arc<HandlerRegistry>,
    stats: Arc<StatsCounters>,
    teardown_timeout: Duration,
}

impl ReaderLoop {
    pub(crate) fn new(
        epoch: Arc<Epoch>,
        reader: LineReader,
        handlers: Arc<HandlerRegistry>,
        stats: Arc<StatsCounters>,
        teardown_timeout: Duration,
    ) -> Self {
        Self {
            epoch,
            reader,
            handlers,
            stats,
            teardown_timeout,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let span = info_span!("reader", epoch = self.epoch.id(), peer_addr = %self.epoch.peer_addr());
        tokio::spawn(self.run().instrument(span))
    }

    async fn run(mut self) {
        debug!("Started task 'reader'");
        let token = self.epoch.cancel_token().clone();

        let reason = loop {
            if token.is_cancelled() {
                break ExitReason::Cancelled;
            }

            let outcome = select! {
                biased;
                _ = token.cancelled() => break ExitReason::Cancelled,
                outcome = read_next(&mut self.reader) => outcome,
            };

            match outcome {
                ReadOutcome::Line(line) => {
                    if line.trim().is_empty() {
                        trace!("Discarding blank line");
                        continue;
                    }
                    trace!(line = ?line, "Received line");
                    self.stats.record_line_received();
                    self.handlers.dispatch(&line).await;
                }
                ReadOutcome::EndOfStream => break ExitReason::EndOfStream,
                ReadOutcome::Failed(error) => break ExitReason::Failed(error),
            }
        };

        match &reason {
            ExitReason::Cancelled => debug!("Reader cancelled"),
            ExitReason::EndOfStream => info!("Connection closed by device"),
            ExitReason::Failed(error) if error.is_connection_error() => {
                info!(error = %error, "Connection read failed")
            }
            ExitReason::Failed(error) => warn!(error = %error, "Dropping connection after bad input"),
        }

        self.epoch.close(self.teardown_timeout).await;
        debug!(reason = ?reason, "Completed task 'reader'");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LineEnding;
    use crate::codec::LineCodec;
    use crate::handler::CallbackHandler;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_util::codec::{FramedRead, FramedWrite};
    use tracing_test::traced_test;

    struct Harness {
        epoch: Arc<Epoch>,
        task: JoinHandle<()>,
        server: TcpStream,
        lines: mpsc::UnboundedReceiver<String>,
        stats: Arc<StatsCounters>,
    }

    async fn harness(max_line_length: usize) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_task = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let client = TcpStream::connect(addr).await.unwrap();
        let server = server_task.await.unwrap();

        let codec = LineCodec::new(LineEnding::Lf, max_line_length);
        let (read_half, write_half) = client.into_split();
        let epoch = Arc::new(Epoch::new(
            1,
            addr,
            FramedWrite::new(write_half, codec.clone()),
        ));

        let (tx, lines) = mpsc::unbounded_channel();
        let handlers = Arc::new(HandlerRegistry::default());
        handlers.add(Arc::new(CallbackHandler::new(move |line: &str| {
            let _ = tx.send(line.to_string());
        })));
        let stats = Arc::new(StatsCounters::default());

        let task = ReaderLoop::new(
            epoch.clone(),
            FramedRead::new(read_half, codec),
            handlers,
            stats.clone(),
            Duration::from_secs(1),
        )
        .spawn();

        Harness {
            epoch,
            task,
            server,
            lines,
            stats,
        }
    }

    #[tokio::test]
    async fn test_blank_lines_skipped_until_end_of_stream() {
        let mut h = harness(1024).await;

        h.server.write_all(b"OK\n").await.unwrap();
        h.server.write_all(b"\n").await.unwrap();
        h.server.write_all(b" \t \r\n").await.unwrap();
        h.server.write_all(b"SRATE 48000\n").await.unwrap();
        h.server.shutdown().await.unwrap();

        timeout(Duration::from_secs(2), h.task).await.unwrap().unwrap();

        let mut received = Vec::new();
        while let Ok(line) = h.lines.try_recv() {
            received.push(line);
        }
        assert_eq!(received, vec!["OK", "SRATE 48000"]);
        assert_eq!(h.stats.snapshot().lines_received, 2);
        assert!(!h.epoch.is_live());
    }

    #[tokio::test]
    async fn test_cancel_stops_reader_and_closes_epoch() {
        let h = harness(1024).await;

        h.epoch.cancel_token().cancel();
        timeout(Duration::from_secs(2), h.task).await.unwrap().unwrap();
        assert!(!h.epoch.is_live());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_read_error_ends_loop() {
        let mut h = harness(8).await;

        h.server.write_all(b"FAR TOO LONG FOR EIGHT\n").await.unwrap();
        timeout(Duration::from_secs(2), h.task).await.unwrap().unwrap();

        assert!(h.lines.try_recv().is_err());
        assert!(!h.epoch.is_live());
        assert!(logs_contain("Dropping connection after bad input"));
    }

    #[tokio::test]
    async fn test_read_next_outcomes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_task = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let client = TcpStream::connect(addr).await.unwrap();
        let mut server = server_task.await.unwrap();

        let mut reader = FramedRead::new(client.into_split().0, LineCodec::default());
        server.write_all(b"MV 45\n").await.unwrap();
        drop(server);

        assert!(matches!(read_next(&mut reader).await, ReadOutcome::Line(ref l) if l == "MV 45"));
        assert!(matches!(read_next(&mut reader).await, ReadOutcome::EndOfStream));
    }
}
