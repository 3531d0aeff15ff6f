//! readsb-mqtt - MQTT client that forwards readsb decoder statistics
//! to Home Assistant
//!
//! Watches `/run/readsb/` for the periodically rewritten `stats.pb`
//! snapshot, decodes the one-minute statistics window and republishes
//! the values via MQTT using the Home Assistant discovery protocol, so
//! the feeder shows up as a set of auto-registered sensors plus a
//! "running" binary sensor.

pub mod config;
pub mod daemon;
pub mod mqtt;
pub mod publish;
pub mod snapshot;
pub mod store;
pub mod watch;

pub use config::BridgeConfig;
pub use publish::{Broker, Publisher};
pub use store::{Metric, MetricStore};
