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

//! Line Console Example
//!
//! Connects to a line-protocol device, prints every line it sends and
//! forwards each line typed on stdin as a command. The connection is
//! replaced automatically when the heartbeat finds it dead.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example line_console -- 192.168.1.40 23
//! ```

use std::time::Duration;
use tetherline_client::{ClientConfig, LineClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let host = args.get(1).map(|s| s.as_str()).unwrap_or("localhost");
    let port: u16 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(23);

    println!("Line Console");
    println!("============");
    println!("Connecting to: {}:{}", host, port);
    println!("Type a command and press Enter. Ctrl+C quits.");
    println!();

    let config = ClientConfig::new(host, port)
        .with_auto_reconnect(true)
        .with_heartbeat_interval(Duration::from_secs(10));
    let client = LineClient::new(config);

    client.on_line(|line| println!("<< {}", line));
    client.connect().await?;
    if !client.is_connected() {
        println!(
            "{} unreachable, waiting for input anyway",
            client.config().address()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match client.send(&line).await {
                    Ok(()) => println!(">> {}", line),
                    Err(error) if error.is_recoverable() => {
                        // Connection missing or lost; try again on demand
                        client.connect().await?;
                        if let Err(error) = client.send(&line).await {
                            warn!(error = %error, "Command not sent");
                        }
                    }
                    Err(error) => warn!(error = %error, "Command not sent"),
                }
            }
        }
    }

    client.dispose().await;
    println!("\n=== Disconnected ===");
    Ok(())
}
