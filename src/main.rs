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

//! HC-06 Terminal

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hc06_terminal::bluetooth::{
    discovery, DeviceRef, DiscoveryEvent, RfcommProvider, ScanHandle, SerialSession,
};
use hc06_terminal::commands::{self, Command, ConnectTarget};
use hc06_terminal::config::Config;
use hc06_terminal::events::EventProcessor;
use hc06_terminal::state::AppState;

type Scan = (ScanHandle, mpsc::Receiver<DiscoveryEvent>);

/// Next event of the running scan, if any.
async fn next_discovery(scan: &mut Option<Scan>) -> Option<DiscoveryEvent> {
    match scan {
        Some((_, events)) => events.recv().await,
        None => std::future::pending().await,
    }
}

fn spawn_connect(session: &SerialSession<RfcommProvider>, device: DeviceRef) {
    let session = session.clone();
    tokio::spawn(async move {
        if let Err(e) = session.connect(device).await {
            debug!("Connect finished with: {}", e);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hc06_terminal=info".parse()?),
        )
        .init();

    info!("Starting HC-06 Terminal v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let state = AppState::new();
    let processor = EventProcessor::new(Arc::clone(&state), config.terminal.timestamps);

    // Bluetooth adapter
    let bt_session = bluer::Session::new().await?;
    let adapter = bt_session.default_adapter().await?;
    info!("Using Bluetooth adapter: {}", adapter.name());
    discovery::ensure_powered(&adapter).await?;

    let provider = RfcommProvider::new(
        bt_session.clone(),
        adapter.clone(),
        config.bluetooth.rfcomm_channel,
    );
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let session = SerialSession::new(provider, config.session_options(), event_tx);

    state.set_devices(discovery::bonded_devices(&adapter).await?);
    for label in state.device_labels() {
        println!("{}", label);
    }

    // Startup target: configured address, else nothing until /connect.
    if let Some(address) = config.bluetooth.address()? {
        let devices = state.devices.read().clone();
        let target = ConnectTarget::Address(address);
        if let Ok(device) =
            commands::resolve_target(&target, &devices, &devices, &config.bluetooth.name_filter)
        {
            println!("{}", processor.log(format!("Connecting to {}...", device)));
            state.set_status(format!("Status: Connecting to {}", device.display_name()));
            spawn_connect(&session, device);
        }
    }

    println!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut scan: Option<Scan> = None;

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                println!("{}", processor.process_event(&event));
            }
            Some(event) = next_discovery(&mut scan) => {
                if let Some(line) = processor.process_discovery(&event) {
                    println!("{}", line);
                }
                if event == DiscoveryEvent::ScanFinished {
                    scan = None;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                match Command::parse(&line) {
                    Command::Send(text) => {
                        if text.is_empty() {
                            continue;
                        }
                        if !session.is_connected() {
                            println!("Not connected");
                            continue;
                        }
                        let payload = format!("{}{}", text, config.terminal.line_ending);
                        let session = session.clone();
                        tokio::spawn(async move {
                            if let Err(e) = session.send(payload).await {
                                debug!("Send finished with: {}", e);
                            }
                        });
                    }
                    Command::Paired => {
                        match discovery::bonded_devices(&adapter).await {
                            Ok(devices) => {
                                state.set_devices(devices);
                                let labels = state.device_labels();
                                if labels.is_empty() {
                                    println!("{}", processor.log(
                                        "No bonded devices. Pair the HC-06 in the system settings (PIN 1234 or 0000)."
                                    ));
                                } else {
                                    for label in labels {
                                        println!("{}", label);
                                    }
                                    println!("{}", processor.log(format!(
                                        "Showing {} bonded devices.",
                                        state.devices.read().len()
                                    )));
                                }
                            }
                            Err(e) => warn!("Cannot list bonded devices: {}", e),
                        }
                    }
                    Command::Scan => {
                        if let Some((mut handle, _)) = scan.take() {
                            handle.cancel();
                        }
                        state.clear_devices();
                        match discovery::scan(&adapter, config.bluetooth.scan_duration()).await {
                            Ok(started) => {
                                println!("{}", processor.log("Scanning..."));
                                scan = Some(started);
                            }
                            Err(e) => warn!("Cannot start scan: {}", e),
                        }
                    }
                    Command::Connect(target) => {
                        let devices = state.devices.read().clone();
                        let bonded = if target == ConnectTarget::ByName {
                            discovery::bonded_devices(&adapter).await.unwrap_or_else(|e| {
                                warn!("Cannot list bonded devices: {}", e);
                                Vec::new()
                            })
                        } else {
                            Vec::new()
                        };
                        match commands::resolve_target(&target, &devices, &bonded, &config.bluetooth.name_filter) {
                            Ok(device) => {
                                // Discovery slows down connection setup.
                                if let Some((handle, _)) = scan.as_mut() {
                                    handle.cancel();
                                }
                                println!("{}", processor.log(format!("Connecting to {}...", device)));
                                state.set_status(format!("Status: Connecting to {}", device.display_name()));
                                spawn_connect(&session, device);
                            }
                            Err(msg) => println!("{}", processor.log(msg)),
                        }
                    }
                    Command::Close => {
                        session.close();
                        state.set_status("Status: Closed");
                        println!("{}", processor.log("Connection closed."));
                    }
                    Command::Status => {
                        println!("{} ({})", state.get_status(), session.state().as_str());
                        for label in state.device_labels() {
                            println!("{}", label);
                        }
                    }
                    Command::Help => println!("{}", commands::HELP),
                    Command::Quit => {
                        info!("Quit requested");
                        break;
                    }
                    Command::Invalid(msg) => println!("{}", msg),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if let Some((mut handle, _)) = scan.take() {
        handle.cancel();
    }
    session.close();

    info!("HC-06 Terminal stopped");
    Ok(())
}
