// Copyright 2026 The BluePass Team
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

//! BluePass command line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bluepass::bluetooth::{self, Connector, DeviceAddress, StubConnector};
use bluepass::config::{Config, SettingsSource, SettingsStore};
use bluepass::delivery::{Command, DeliveryController};
use bluepass::events::EventProcessor;
use bluepass::filter;
use bluepass::state::{DeliveryStatus, RelayState, StatusSink};

/// Relay one-time codes from text messages to a Bluetooth device.
#[derive(Parser)]
#[command(name = "bluepass", version, about)]
struct Cli {
    /// Configuration file to use instead of the default one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Read JSON events from stdin and deliver matching codes.
    Run {
        /// Log what would be sent instead of using Bluetooth.
        #[arg(long)]
        dry_run: bool,
    },
    /// Deliver a single code and wait for the result.
    Send {
        code: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Test a message against the configured filter.
    Check {
        #[arg(long)]
        sender: Option<String>,
        #[arg(long)]
        body: String,
        /// Test this content pattern instead of the configured rule.
        #[arg(long)]
        content_pattern: Option<String>,
    },
    /// Store the sender and content patterns.
    SetFilter {
        #[arg(long)]
        sender: String,
        #[arg(long)]
        content: String,
    },
    /// Store the target device.
    SetDevice {
        address: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Connect to a device once to start pairing.
    Probe {
        /// Defaults to the configured device.
        address: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// List paired devices.
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let path = cli.config.unwrap_or_else(Config::default_path);
    let settings = Arc::new(
        SettingsStore::open(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
    );

    match cli.command {
        CliCommand::Run { dry_run } => handle_run(settings, dry_run).await,
        CliCommand::Send { code, dry_run } => handle_send(settings, code, dry_run).await,
        CliCommand::Check {
            sender,
            body,
            content_pattern,
        } => {
            handle_check(&settings, sender, &body, content_pattern);
            Ok(())
        }
        CliCommand::SetFilter { sender, content } => {
            settings.set_filter_patterns(&sender, &content)?;
            println!("Filter saved to {}", settings.path().display());
            Ok(())
        }
        CliCommand::SetDevice { address, name } => {
            settings.set_device(&address, name.as_deref())?;
            println!("Device saved to {}", settings.path().display());
            Ok(())
        }
        CliCommand::Probe { address, dry_run } => handle_probe(settings, address, dry_run).await,
        CliCommand::Devices => handle_devices(&settings).await,
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let directive = if verbose {
        "bluepass=debug"
    } else {
        "bluepass=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();
    Ok(())
}

async fn create_connector(dry_run: bool, channel: Option<u8>) -> Result<Arc<dyn Connector>> {
    if dry_run {
        info!("Dry run, nothing is sent over Bluetooth");
        return Ok(Arc::new(StubConnector::accepting()));
    }

    #[cfg(feature = "bluetooth")]
    {
        let connector = bluetooth::RfcommConnector::new(channel).await?;
        Ok(Arc::new(connector))
    }

    #[cfg(not(feature = "bluetooth"))]
    {
        let _ = channel;
        bail!("Built without Bluetooth support, use --dry-run")
    }
}

async fn handle_run(settings: Arc<SettingsStore>, dry_run: bool) -> Result<()> {
    info!("Starting BluePass v{}...", env!("CARGO_PKG_VERSION"));

    let connector = create_connector(dry_run, settings.channel()).await?;
    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<DeliveryStatus>();
    let controller = DeliveryController::new(connector, settings.clone(), Arc::new(status_tx))
        .with_timing(settings.timing());

    let state = RelayState::new();
    let state_reports = state.clone();
    let reporter = tokio::spawn(async move {
        while let Some(status) = status_rx.recv().await {
            info!("{}", status.title());
            state_reports.report(status);
        }
    });

    let (command_tx, command_rx) = mpsc::channel::<Command>(32);
    let controller_task = tokio::spawn(controller.run(command_rx));

    let processor = EventProcessor::new(settings, command_tx.clone());
    info!("Ready. Reading events from stdin.");

    tokio::select! {
        result = processor.run(BufReader::new(tokio::io::stdin())) => {
            if let Err(e) = result {
                error!("Event input failed: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    // The controller may already have left its loop after a shutdown event.
    let _ = command_tx.send(Command::Shutdown).await;
    drop(command_tx);
    controller_task.await?;
    reporter.await?;

    if let (Some(status), Some(at)) = (state.get_status(), state.get_updated_at()) {
        info!(
            "Last status: {} at {} ({} reports)",
            status.title(),
            at.format("%H:%M:%S"),
            state.get_report_count()
        );
    }
    info!("BluePass stopped");
    Ok(())
}

async fn handle_send(settings: Arc<SettingsStore>, code: String, dry_run: bool) -> Result<()> {
    let connector = create_connector(dry_run, settings.channel()).await?;
    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<DeliveryStatus>();
    let controller = DeliveryController::new(connector, settings.clone(), Arc::new(status_tx))
        .with_timing(settings.timing());

    let (command_tx, command_rx) = mpsc::channel::<Command>(8);
    let controller_task = tokio::spawn(controller.run(command_rx));
    command_tx.send(Command::PushCode(code)).await?;

    let mut last = None;
    loop {
        tokio::select! {
            status = status_rx.recv() => {
                let Some(status) = status else { break };
                println!("{}", status.title());
                if status.is_terminal() {
                    last = Some(status);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping delivery");
                break;
            }
        }
    }

    let _ = command_tx.send(Command::Shutdown).await;
    controller_task.await?;

    match last {
        Some(DeliveryStatus::Success(_)) => Ok(()),
        Some(status) => bail!("{}", status.title()),
        None => bail!("Delivery did not finish"),
    }
}

fn handle_check(
    settings: &SettingsStore,
    sender: Option<String>,
    body: &str,
    content_pattern: Option<String>,
) {
    if let Some(pattern) = content_pattern {
        let compiled = filter::compile(&pattern);
        match filter::extract_code(compiled.as_ref(), body) {
            Ok(code) => println!("Code: {code}"),
            Err(e) => println!("Error: {e}"),
        }
        return;
    }

    let result = settings
        .filter_rule()
        .check(sender.as_deref().unwrap_or_default(), body);
    println!("{}", result.describe());
}

async fn handle_probe(
    settings: Arc<SettingsStore>,
    address: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let address = match address {
        Some(text) => DeviceAddress::parse(&text)?,
        None => match settings.target_device() {
            Some(target) => target.address,
            None => bail!("No device given and none configured"),
        },
    };

    let connector = create_connector(dry_run, settings.channel()).await?;
    info!("Probe a connection to {} to start pairing process", address);
    bluetooth::probe(connector.as_ref(), address).await?;
    println!("Connected to {address}");
    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn handle_devices(settings: &SettingsStore) -> Result<()> {
    let connector = bluetooth::RfcommConnector::new(settings.channel()).await?;
    let devices = connector.paired_devices().await?;
    if devices.is_empty() {
        println!("No paired devices");
    }
    for device in devices {
        let marker = if device.offers_service { " *" } else { "" };
        println!("{}  {}{}", device.address, device.name, marker);
    }
    Ok(())
}

#[cfg(not(feature = "bluetooth"))]
async fn handle_devices(_settings: &SettingsStore) -> Result<()> {
    bail!("Built without Bluetooth support")
}
