//! Connects to an INDI server, prints property changes as they arrive and
//! optionally writes values.
//!
//! ```text
//! indi-monitor localhost --device "CCD Simulator" \
//!     --set "/CCD Simulator/CONNECTION/CONNECT=ON" --duration 30
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use lodestar_indi::{
    parse_key, IndiClient, IndiClientConfig, IndiEvent, NewPropertyRequest, PropertyFlag,
    PropertyListItem, SendOutcome,
};
use tokio::time::{interval, sleep, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "indi-monitor", about = "Watch and drive devices on an INDI server")]
struct Args {
    /// Server host (overrides the config file)
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Only request properties of this device; repeatable
    #[arg(short, long = "device")]
    devices: Vec<String>,

    /// TOML client configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where received BLOBs are written
    #[arg(long)]
    blob_dir: Option<PathBuf>,

    /// Write `/device/property/element=value` once the property is defined; repeatable
    #[arg(long = "set", value_name = "KEY=VALUE")]
    sets: Vec<String>,

    /// Seconds to run before disconnecting; 0 runs until Ctrl-C
    #[arg(long, default_value_t = 0)]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => IndiClientConfig::from_file(path)?,
        None => IndiClientConfig::default(),
    };
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.blob_dir.is_some() {
        config.blob_dir = args.blob_dir.clone();
    }

    let writes = args
        .sets
        .iter()
        .map(|s| parse_assignment(s))
        .collect::<Result<Vec<_>>>()?;

    let mut client = IndiClient::with_config(config);
    for device in &args.devices {
        client.watch_device(device);
    }
    let mut events = client.subscribe();
    client
        .connect()
        .await
        .with_context(|| format!("connecting to {}:{}", client.config().host, client.config().port))?;

    let deadline = (args.duration > 0).then(|| Instant::now() + Duration::from_secs(args.duration));
    let mut pending = writes;
    let table = client.table();
    let mut tick = interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending().await,
                }
            } => break,
            event = events.recv() => match event {
                Ok(IndiEvent::Message { device, message }) => {
                    println!("[{}] {}", device.as_deref().unwrap_or("server"), message);
                }
                Ok(IndiEvent::BlobStored { path, size, .. }) => {
                    println!("BLOB {} ({} bytes)", path.display(), size);
                }
                Ok(IndiEvent::Disconnected(status)) => {
                    println!("disconnected (status {})", status.code());
                    break;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("event stream: {}", e),
            },
            _ = tick.tick() => {
                for item in table.drain_changes().await {
                    print_item(&item);
                }
                pending = send_ready(&client, pending).await;
            }
        }
    }

    client.disconnect().await?;
    // let the writer flush before exit
    sleep(Duration::from_millis(50)).await;
    Ok(())
}

fn parse_assignment(text: &str) -> Result<(String, String)> {
    let Some((key, value)) = text.split_once('=') else {
        bail!("expected KEY=VALUE, got {:?}", text);
    };
    parse_key(key)?;
    Ok((key.to_string(), value.to_string()))
}

/// Send every write whose property is defined; return the rest
async fn send_ready(client: &IndiClient, writes: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut waiting = Vec::new();
    for (key, value) in writes {
        let Ok((device, property, _)) = parse_key(&key) else {
            continue;
        };
        let Some(prop) = client.property(&device, &property).await else {
            waiting.push((key, value));
            continue;
        };
        let request = match NewPropertyRequest::from_key(&key, prop.kind, &value) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("{}: {}", key, e);
                continue;
            }
        };
        match client.send_new_property_value(&request, true).await {
            Ok(SendOutcome::Completed) => println!("{} = {} ok", key, value),
            Ok(outcome) => println!("{} = {} {:?}", key, value, outcome),
            Err(e) => eprintln!("{} = {} failed: {}", key, value, e),
        }
    }
    waiting
}

fn print_item(item: &PropertyListItem) {
    let marker = match item.flag {
        PropertyFlag::Insert => '+',
        PropertyFlag::Update => '~',
        PropertyFlag::Remove => '-',
        PropertyFlag::Idle => ' ',
    };
    println!("{} {:<50} {:>16} [{}]", marker, item.key, item.value, item.state);
}
