//! Configuration and CLI surface
//!
//! Handles:
//! - Command line options (broker URI, credentials, client id, topic prefix)
//! - Broker URI parsing
//! - Fixed paths and protocol constants

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the snapshot file readsb rewrites once per minute.
pub const SNAPSHOT_FILE: &str = "stats.pb";

/// Directory the snapshot is moved into after each aggregation cycle.
pub const SNAPSHOT_DIR: &str = "/run/readsb";

/// Hardware temperature source, plain text in millidegrees Celsius.
pub const TEMPERATURE_PATH: &str = "/sys/class/hwmon/hwmon0/temp1_input";

/// Discovery root for the feeder status binary sensor.
pub const BINARY_SENSOR_ROOT: &str = "homeassistant/binary_sensor";

/// A window-end timestamp more than this many seconds past the previous
/// one means the feeder stopped reporting.
pub const LIVENESS_TOLERANCE_SECS: u64 = 90;

// String length limits from MQTT v3.1.1, see the connect packet.
pub const MAX_TOPIC_SIZE: usize = 250;
pub const MAX_PAYLOAD_SIZE: usize = 65535;
pub const MAX_CLIENT_ID_SIZE: usize = 23;

pub const KEEP_ALIVE: Duration = Duration::from_secs(20);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const ACK_TIMEOUT: Duration = Duration::from_millis(100);
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Readsb MQTT statistics client
#[derive(Debug, Parser)]
#[command(name = "readsb-mqtt", version, about)]
pub struct Cli {
    /// MQTT broker URI
    #[arg(short, long, value_name = "URI", default_value = "tcp://localhost:1883")]
    pub broker: String,

    /// MQTT broker auth username
    #[arg(short, long, value_name = "username")]
    pub user: Option<String>,

    /// MQTT broker auth password
    #[arg(short, long, value_name = "password")]
    pub pass: Option<String>,

    /// MQTT unique client id
    #[arg(short = 'i', long = "id", value_name = "clientid", default_value = "feeder001")]
    pub client_id: String,

    /// MQTT topic prefix
    #[arg(short, long, value_name = "topic", default_value = "homeassistant/sensor")]
    pub topic: String,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub topic_prefix: String,
    pub snapshot_dir: PathBuf,
    pub temperature_path: PathBuf,
}

impl BridgeConfig {
    /// Build the runtime configuration from parsed CLI options.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let (broker_host, broker_port) = parse_broker_uri(&cli.broker)
            .with_context(|| format!("invalid broker URI '{}'", cli.broker))?;

        if cli.client_id.is_empty() || cli.client_id.len() > MAX_CLIENT_ID_SIZE {
            bail!(
                "client id must be 1..={} characters, got {}",
                MAX_CLIENT_ID_SIZE,
                cli.client_id.len()
            );
        }

        Ok(Self {
            broker_host,
            broker_port,
            username: cli.user,
            password: cli.pass,
            client_id: cli.client_id,
            topic_prefix: cli.topic,
            snapshot_dir: PathBuf::from(SNAPSHOT_DIR),
            temperature_path: PathBuf::from(TEMPERATURE_PATH),
        })
    }

    /// Absolute path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_dir.join(SNAPSHOT_FILE)
    }
}

/// Parse a `tcp://host:port` broker URI into host and port.
///
/// The scheme is optional; a missing port defaults to 1883.
fn parse_broker_uri(uri: &str) -> Result<(String, u16)> {
    let rest = match uri.split_once("://") {
        Some(("tcp", rest)) | Some(("mqtt", rest)) => rest,
        Some((scheme, _)) => bail!("unsupported scheme '{scheme}'"),
        None => uri,
    };

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().with_context(|| format!("invalid port '{port}'"))?;
            (host, port)
        }
        None => (rest, 1883),
    };

    if host.is_empty() {
        bail!("missing host");
    }
    Ok((host.to_string(), port))
}
