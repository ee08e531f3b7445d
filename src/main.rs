// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! spp-link terminal client

use anyhow::Result;
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spp_link::bluetooth::{BluezTransport, SerialClient};
use spp_link::config::Config;
use spp_link::events::SessionEvent;

const HELP: &str = "\
Commands:
  scan             search for nearby devices
  stop             stop searching
  list             show known devices
  connect <id>     open a serial link
  send <text>      send text over the link
  disconnect       close the link
  status           show adapter and link state
  enable|disable   power the adapter on or off
  help             show this text
  quit             exit";

type Client = SerialClient<BluezTransport>;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    info!("Starting spp-link v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", Config::default_path().display());

    let transport = Arc::new(BluezTransport::new(&config.bluetooth).await?);
    let client = Arc::new(SerialClient::new(transport, &config.bluetooth));

    // Print session events
    let mut event_rx = client.subscribe();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    match client.start().await {
        Ok(state) => println!("Bluetooth adapter: {}", state),
        Err(e) => {
            // Keep running; `enable` or a later adapter event may recover.
            error!("Bluetooth not ready: {}", e);
            println!("Bluetooth not ready: {}", e);
        }
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                if !run_command(&client, line.trim()).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    client.shutdown().await;
    info!("spp-link stopped");
    Ok(())
}

/// Execute one command line. Returns `false` when the user asked to quit.
async fn run_command(client: &Arc<Client>, line: &str) -> bool {
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "scan" => match client.start_discovery() {
            Ok(Some(mut pass)) => {
                println!("Scanning...");
                tokio::spawn(async move {
                    while let Some(item) = pass.next().await {
                        if let Err(e) = item {
                            warn!("Scan ended with error: {}", e);
                        }
                    }
                });
            }
            Ok(None) => println!("Already scanning"),
            Err(e) => println!("Cannot scan: {}", e),
        },
        "stop" => client.stop_discovery(),
        "list" => {
            let devices = client.devices();
            if devices.is_empty() {
                println!("No known devices");
            }
            for device in devices {
                println!("  {}", device);
            }
        }
        "connect" if !arg.is_empty() => {
            let client = client.clone();
            let id = arg.to_string();
            tokio::spawn(async move {
                if let Err(e) = client.connect(&id).await {
                    println!("Connect to {} failed: {}", id, e);
                }
            });
        }
        "send" if !arg.is_empty() => {
            if let Err(e) = client.send_text(arg).await {
                println!("Send failed: {}", e);
            }
        }
        "disconnect" => client.disconnect().await,
        "status" => {
            println!("Adapter: {}", client.adapter_state());
            match client.connected_device() {
                Some(device) => println!("Link: Connected to {}", device),
                None => println!("Link: {}", client.connection_state()),
            }
            if client.is_discovering() {
                println!("Scanning...");
            }
            if let Some(text) = client.pending_outbound() {
                println!("Unsent: {}", text);
            }
        }
        "enable" => {
            if let Err(e) = client.enable_adapter().await {
                println!("Enable failed: {}", e);
            }
        }
        "disable" => {
            if let Err(e) = client.disable_adapter().await {
                println!("Disable failed: {}", e);
            }
        }
        "help" => println!("{}", HELP),
        "quit" | "exit" => return false,
        _ => println!("Unknown command: {} (try 'help')", line),
    }
    true
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::AdapterEnabled => println!("* Bluetooth enabled"),
        SessionEvent::AdapterDisabled => println!("* Bluetooth disabled"),
        SessionEvent::KnownDevicesRefreshed(devices) => {
            println!("* {} paired device(s)", devices.len())
        }
        SessionEvent::DeviceDiscovered(device) => println!("* Found {}", device),
        SessionEvent::DiscoveryFinished { found } => {
            println!("* Scan finished, {} new device(s)", found)
        }
        SessionEvent::DiscoveryFailed(reason) => println!("* Scan failed: {}", reason),
        SessionEvent::Connecting(device) => println!("* Connecting to {}...", device),
        SessionEvent::ConnectFailed(reason) => println!("* Connect failed: {}", reason),
        SessionEvent::Connected(device) => println!("* Connected to {}", device.display_name()),
        SessionEvent::Disconnected => println!("* Not connected"),
        SessionEvent::DataReceived(bytes) => {
            println!("< {}", String::from_utf8_lossy(bytes).trim_end())
        }
        SessionEvent::TransportError(message) => println!("* Error: {}", message),
    }
}
