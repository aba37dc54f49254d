//! SmokeLink diagnostic console
//!
//! A small command-line front end for the remote's debug bridge.
//!
//! Usage:
//!   cargo run --example console -- [OPTIONS] COMMAND
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyUSB0)
//!   --baud RATE       Baud rate (default: 115200)
//!   --config FILE     Load settings from a JSON file
//!
//! Commands:
//!   ports             List serial ports
//!   ping              Round-trip a ping
//!   info              Firmware and device info
//!   stats             Remote and timer statistics
//!   rssi              Signal strength report
//!   inventory         List paired devices
//!   discover SECS     Scan for devices for SECS seconds and list them
//!   monitor SECS      Print streaming telemetry for SECS seconds
//!
//! Set RUST_LOG=smokelink_core=debug to see frame-level logging.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use smokelink_core::prelude::*;
use smokelink_core::protocol::payloads::{
    DeviceInfo, RemoteStatsPayload, RssiReport, TimerStatsPayload,
};
use smokelink_core::protocol::{best_rssi, list_ports, WirePayload};
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("usage: console [--port PORT] [--baud RATE] [--config FILE] COMMAND [ARG]");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = LinkConfig::for_endpoint("/dev/ttyUSB0");
    let mut command = None;
    let mut argument = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                config.endpoint = args.get(i).cloned().unwrap_or_else(|| usage());
            }
            "--baud" | "-b" => {
                i += 1;
                config.baud_rate = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| usage());
            }
            "--config" | "-c" => {
                i += 1;
                let path = args.get(i).unwrap_or_else(|| usage());
                config = LinkConfig::load(path)
                    .with_context(|| format!("failed to load config {path}"))?;
            }
            "--help" | "-h" => usage(),
            other if command.is_none() => command = Some(other.to_string()),
            other => argument = Some(other.to_string()),
        }
        i += 1;
    }

    let Some(command) = command else { usage() };
    let seconds = argument
        .as_deref()
        .map(str::parse::<u64>)
        .transpose()
        .context("SECS must be a number")?
        .unwrap_or(5);

    if command == "ports" {
        for port in list_ports() {
            match (port.usb_id, &port.product) {
                (Some((vid, pid)), Some(product)) => {
                    println!("{}  [{vid:04x}:{pid:04x}] {product}", port.name)
                }
                (Some((vid, pid)), None) => println!("{}  [{vid:04x}:{pid:04x}]", port.name),
                _ => println!("{}", port.name),
            }
        }
        return Ok(());
    }

    let client = LinkClient::new(config);
    client
        .open()
        .await
        .with_context(|| format!("could not open {}", client.config().endpoint))?;

    let outcome = run(&client, &command, seconds).await;
    println!("{}", client.stats());
    client.disconnect().await;
    outcome
}

async fn run(client: &LinkClient, command: &str, seconds: u64) -> Result<()> {
    match command {
        "ping" => {
            let started = std::time::Instant::now();
            let response = client.send(Command::Ping, &[]).await?;
            println!("Ping: {} in {:?}", response.status, started.elapsed());
        }
        "info" => {
            let response = client.send(Command::GetDeviceInfo, &[]).await?;
            let info = DeviceInfo::decode(response.data())?;
            println!(
                "Firmware {:#010x} built {} kind {}",
                info.firmware_version, info.build_timestamp, info.device_kind
            );
        }
        "stats" => {
            let remote = client.send(Command::GetRemoteStats, &[]).await?;
            let remote = RemoteStatsPayload::decode(remote.data())?;
            let timer = client.send(Command::GetTimerStats, &[]).await?;
            let timer = TimerStatsPayload::decode(timer.data())?;

            println!("Remote link: {}", remote.remote_link.transport);
            println!(
                "  RSSI local={} peer={} ch={}",
                remote.remote_link.rssi_local,
                remote.remote_link.rssi_peer,
                remote.remote_link.channel
            );
            println!("  Remote: {}", remote.remote);
            println!(
                "  Serial: tx={} rx={} errors={}",
                remote.serial_link.tx_frames,
                remote.serial_link.rx_frames,
                remote.serial_link.errors
            );
            println!("Timer link: {}", timer.link.transport);
            println!("  Timer: {}", timer.timer);
            println!(
                "  Best RSSI remote={} timer={}",
                best_rssi(remote.remote_link.rssi_peer, remote.remote_link.rssi_local),
                best_rssi(timer.link.rssi_peer, timer.link.rssi_local)
            );
        }
        "rssi" => {
            let response = client.send(Command::GetRssi, &[]).await?;
            println!("{}", RssiReport::decode(response.data())?);
        }
        "inventory" => {
            let inventory = fetch_inventory(client).await?;
            println!("{} paired device(s)", inventory.total_count);
            for entry in &inventory.entries {
                let marker = if inventory.is_active(entry) { "*" } else { " " };
                println!("{marker} {entry}");
            }
        }
        "discover" => {
            let started = client.send(Command::StartDiscovery, &[]).await?;
            if !started.status.is_ok() {
                bail!("discovery refused: {}", started.status);
            }
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            client.send(Command::StopDiscovery, &[]).await?;

            let discovery = fetch_discovered(client).await?;
            println!("{} device(s) found", discovery.total_count);
            for entry in &discovery.entries {
                println!("  {entry}");
            }
        }
        "monitor" => {
            client.set_event_handler(|packet| {
                if !packet.is_streaming() {
                    println!("unsolicited {} ({})", packet.command, packet.status);
                    return;
                }
                match RemoteStatsPayload::decode(packet.data()) {
                    Ok(stats) => println!(
                        "ch{} rssi={} {}",
                        stats.remote_link.channel,
                        best_rssi(stats.remote_link.rssi_peer, stats.remote_link.rssi_local),
                        stats.remote
                    ),
                    Err(e) => println!("telemetry: {e}"),
                }
            });
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            client.clear_event_handler();
        }
        other => bail!("unknown command {other:?}"),
    }
    Ok(())
}
