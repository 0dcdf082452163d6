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

//! # Tetherline Line Client
//!
//! Long-lived TCP client for devices that speak a plain newline-delimited
//! text protocol over a raw socket, such as home-theater processors and
//! media players.
//!
//! ## Features
//!
//! - **Line Framing** - Outbound commands are terminated and flushed, inbound
//!   lines are split and delivered to handlers; blank lines are dropped
//! - **Reconnection Support** - A heartbeat probes the connection and replaces
//!   it when it is found dead
//! - **Connection Validation** - An optional handshake hook runs on every new
//!   connection before any line is dispatched
//! - **Race-Free Teardown** - Disconnect, heartbeat failure, end of stream and
//!   dispose all release a connection exactly once
//! - **Async-First** - Built on Tokio
//!
//! ## Architecture
//!
//! ```text
//! LineClient ── connect/reconnect ──▶ Epoch (socket, write stream, cancel token)
//!     │                                   │
//!     ├── send ──────── write lock ───────┤
//!     ├── heartbeat ─── write lock ───────┤
//!     │                                   ▼
//!     └── handlers ◀──── lines ──── reader task (one per epoch)
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use tetherline_client::{ClientConfig, LineClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("192.168.1.40", 23).with_auto_reconnect(true);
//!     let client = LineClient::new(config);
//!
//!     client.on_line(|line| println!("device: {}", line));
//!     client.connect().await?;
//!
//!     if client.is_connected() {
//!         client.send("PWR?").await?;
//!     }
//!
//!     client.dispose().await;
//!     Ok(())
//! }
//! ```

mod client;
mod codec;
mod config;
mod epoch;
mod error;
mod handler;
mod heartbeat;
mod reader;
mod stats;

pub use client::LineClient;
pub use codec::LineCodec;
pub use config::{ClientConfig, ConnectPolicy, LineEnding};
pub use error::{ClientError, Result};
pub use handler::{CallbackHandler, ConnectionValidator, HandlerId, Handshake, LineHandler};
pub use stats::ClientStats;
