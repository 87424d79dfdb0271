//! Command handlers for the blex CLI

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use blex_core::{company_name, decode_advertisement, AdvertisementPayload};
use blex_gatt::profiles::time;
use blex_gatt::{
    BatteryClient, BatteryServer, CentralCallback, CharacteristicRef, ExactTime, GattError,
    LoopbackLink, PeerAddress, PingClient, PingServer, Profile, TimeClient, TimeServer,
};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Decode { hex } => Self::handle_decode_command(&config, &hex),
            Commands::Ping { count, mtu } => {
                let count = count.unwrap_or(config.demo.ping_count);
                Self::handle_ping_command(&config, count, mtu).await
            }
            Commands::Battery => Self::handle_battery_command(&config).await,
            Commands::Time => Self::handle_time_command(&config).await,
        }
    }

    fn handle_decode_command(config: &AppConfig, input: &str) -> Result<()> {
        let report = decode_report(input)?;
        if config.gatt.log.scan_log {
            debug!("Scanned payload {}: {:?}", input, report.payload);
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }

    async fn handle_ping_command(config: &AppConfig, count: u32, mtu: Option<usize>) -> Result<()> {
        for (sent, reply) in run_ping(config, count, mtu).await? {
            println!("> {}", sent);
            println!("< {}", reply);
        }
        Ok(())
    }

    async fn handle_battery_command(config: &AppConfig) -> Result<()> {
        for (instance, level) in run_battery(config).await? {
            println!("Battery instance {}: {}%", instance, level);
        }
        Ok(())
    }

    async fn handle_time_command(config: &AppConfig) -> Result<()> {
        let report = run_time(config).await?;
        println!("Current time: {}", format_time(&report.current));
        match report.notified {
            Some(time) => println!("Notified:     {}", format_time(&time)),
            None => println!("No change notification received"),
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Advertisement Decoding
// ----------------------------------------------------------------------------

/// Decoded payload plus resolved manufacturer names.
#[derive(Debug, Clone, Serialize)]
pub struct DecodeReport {
    #[serde(flatten)]
    pub payload: AdvertisementPayload,
    pub manufacturers: Vec<Manufacturer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manufacturer {
    pub company_id: u16,
    pub company: Option<&'static str>,
    pub data: String,
}

/// Decode hex input; whitespace, `:` separators and a `0x` prefix are accepted.
pub fn decode_report(input: &str) -> Result<DecodeReport> {
    let cleaned: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let bytes = hex::decode(cleaned)?;
    let payload = decode_advertisement(&bytes)?;
    let manufacturers = payload
        .manufacturer_data
        .iter()
        .map(|(company_id, data)| Manufacturer {
            company_id: *company_id,
            company: company_name(*company_id),
            data: data.clone(),
        })
        .collect();
    Ok(DecodeReport {
        payload,
        manufacturers,
    })
}

// ----------------------------------------------------------------------------
// Loopback Demos
// ----------------------------------------------------------------------------

/// Forwards received messages to a channel.
struct ChannelCallback {
    messages: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelCallback {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (messages, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { messages }), rx)
    }
}

impl CentralCallback for ChannelCallback {
    fn on_message(&self, _peer: &PeerAddress, _characteristic: &CharacteristicRef, data: &[u8]) {
        let _ = self.messages.send(data.to_vec());
    }

    fn on_operation_failed(&self, error: &GattError) {
        warn!("Operation failed: {}", error);
    }
}

async fn next_message(
    rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    timeout: Duration,
) -> Result<Vec<u8>> {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(message)) => Ok(message),
        Ok(None) => Err(CliError::Demo("client callback closed".to_string())),
        Err(_) => Err(CliError::Demo(format!(
            "no message within {} ms",
            timeout.as_millis()
        ))),
    }
}

/// Ping a server on a fresh loopback link; returns `(sent, reply)` pairs.
pub async fn run_ping(
    config: &AppConfig,
    count: u32,
    mtu: Option<usize>,
) -> Result<Vec<(String, String)>> {
    let gatt = config.gatt_config(Profile::MagicPing);
    let link = LoopbackLink::new();
    let server = PingServer::session(gatt.clone(), link.peripheral_transport());
    link.bind_peripheral(server.event_sink());
    server.start().await?;

    let (callback, mut messages) = ChannelCallback::new();
    let client = PingClient::with_config(gatt, link.central_transport(), callback);
    link.bind_central(client.session().event_sink());
    client.session().connect(link.peripheral_address()).await?;
    info!("Connected to {}", link.peripheral_address());

    if let Some(mtu) = mtu {
        client.session().request_mtu(mtu).await?;
    }
    debug!("Payload size {}", client.session().payload_size());

    let mut exchanges = Vec::new();
    for round in 0..count {
        if round > 0 {
            tokio::time::sleep(config.ping_interval()).await;
        }
        let sent = client.send_ping().await?;
        let reply = next_message(&mut messages, config.reply_timeout()).await?;
        exchanges.push((sent, String::from_utf8_lossy(&reply).into_owned()));
    }

    client.close();
    server.stop();
    Ok(exchanges)
}

/// Read every battery instance of a fresh battery server.
pub async fn run_battery(config: &AppConfig) -> Result<Vec<(u16, u8)>> {
    let gatt = config.gatt_config(Profile::BatteryService);
    let link = LoopbackLink::new();
    let server = BatteryServer::session(gatt.clone(), link.peripheral_transport());
    link.bind_peripheral(server.event_sink());
    server.start().await?;

    let (callback, _messages) = ChannelCallback::new();
    let client = BatteryClient::with_config(gatt, link.central_transport(), callback);
    link.bind_central(client.session().event_sink());
    client.session().connect(link.peripheral_address()).await?;

    let levels = client.read_battery_levels().await?;
    client.session().close();
    server.stop();
    Ok(levels)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeReport {
    pub current: ExactTime,
    pub notified: Option<ExactTime>,
}

/// Read the server time, then trigger and wait for one change notification.
pub async fn run_time(config: &AppConfig) -> Result<TimeReport> {
    let gatt = config.gatt_config(Profile::TimeService);
    let link = LoopbackLink::new();
    let server = TimeServer::session(gatt.clone(), link.peripheral_transport());
    link.bind_peripheral(server.event_sink());
    server.start().await?;

    let (callback, mut messages) = ChannelCallback::new();
    let client = TimeClient::with_config(gatt, link.central_transport(), callback);
    link.bind_central(client.session().event_sink());
    client.session().connect(link.peripheral_address()).await?;

    let current = client.read_current_time().await?;
    // The read value is delivered as a message too.
    next_message(&mut messages, config.reply_timeout()).await?;

    let delivered = TimeServer::notify_time_change(&server, time::ADJUST_MANUAL).await?;
    let notified = if delivered > 0 {
        let value = next_message(&mut messages, config.reply_timeout()).await?;
        ExactTime::from_bytes(&value)
    } else {
        warn!("No subscribers for time notifications");
        None
    };

    client.session().close();
    server.stop();
    Ok(TimeReport { current, notified })
}

fn format_time(time: &ExactTime) -> String {
    match time.to_naive() {
        Some(naive) => format!("{} (adjust reason 0x{:02x})", naive, time.adjust_reason),
        None => format!("{:?}", time),
    }
}
