//! Snapshot decoding
//!
//! Reads the binary `stats.pb` snapshot readsb moves into place once per
//! aggregation cycle, decodes the one-minute statistics window and updates
//! the metric store. All read/decode failures are tolerated: the previous
//! values stay authoritative and the next snapshot retries naturally.

use crate::store::{Metric, MetricStore};
use prost::Message;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Readsb statistics message, external schema. Only the one-minute
/// window is decoded; unknown fields are skipped.
#[derive(Clone, PartialEq, Message)]
pub struct Statistics {
    #[prost(message, optional, tag = "2")]
    pub last_1min: Option<StatsWindow>,
}

/// One aggregation window of decoder statistics.
#[derive(Clone, PartialEq, Message)]
pub struct StatsWindow {
    /// Window start, seconds since epoch.
    #[prost(uint64, tag = "1")]
    pub start: u64,
    /// Window end, seconds since epoch.
    #[prost(uint64, tag = "2")]
    pub stop: u64,
    #[prost(uint64, tag = "3")]
    pub messages: u64,
    #[prost(uint64, tag = "4")]
    pub tracks_new: u64,
    #[prost(uint64, tag = "5")]
    pub tracks_single_message: u64,
    #[prost(uint64, tag = "6")]
    pub tracks_mlat_position: u64,
    #[prost(uint64, tag = "7")]
    pub tracks_with_position: u64,
    #[prost(uint64, tag = "8")]
    pub max_distance_in_metres: u64,
    #[prost(double, tag = "9")]
    pub max_distance_in_nautical_miles: f64,
    #[prost(uint64, tag = "10")]
    pub local_strong_signals: u64,
    #[prost(double, tag = "11")]
    pub local_signal: f64,
    #[prost(double, tag = "12")]
    pub local_noise: f64,
    #[prost(double, tag = "13")]
    pub local_peak_signal: f64,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cannot read snapshot: {0}")]
    Unreadable(#[from] std::io::Error),
    #[error("snapshot is empty")]
    Empty,
    #[error("unpacking statistics message failed: {0}")]
    Malformed(#[from] prost::DecodeError),
    #[error("statistics message has no 1-minute window")]
    MissingWindow,
}

/// Decode the snapshot at `snapshot_path` and update the store.
///
/// On success the 11 window metrics and the liveness baseline are
/// updated, then the hardware temperature is refreshed best-effort.
/// On any error the store is left untouched.
pub fn refresh(
    snapshot_path: &Path,
    temperature_path: &Path,
    store: &mut MetricStore,
) -> Result<(), SnapshotError> {
    let data = fs::read(snapshot_path)?;
    if data.is_empty() {
        return Err(SnapshotError::Empty);
    }

    let stats = Statistics::decode(data.as_slice())?;
    let window = stats.last_1min.ok_or(SnapshotError::MissingWindow)?;

    store.observe_window_end(window.stop);
    store.set(Metric::Messages, window.messages as f64);
    store.set(Metric::TracksNew, window.tracks_new as f64);
    store.set(Metric::TracksSingle, window.tracks_single_message as f64);
    store.set(Metric::TracksMlat, window.tracks_mlat_position as f64);
    store.set(Metric::TracksPosition, window.tracks_with_position as f64);
    store.set(Metric::MaxDistMetric, window.max_distance_in_metres as f64 / 1000.0);
    store.set(Metric::MaxDistImperial, window.max_distance_in_nautical_miles);
    store.set(Metric::LocalStrong, window.local_strong_signals as f64);
    store.set(Metric::LocalSignal, window.local_signal);
    store.set(Metric::LocalNoise, window.local_noise);
    store.set(Metric::LocalPeak, window.local_peak_signal);

    // Temperature is a side reading; failure must never abort the update.
    if let Some(celsius) = read_temperature(temperature_path) {
        store.set(Metric::Temperature, celsius);
    }

    debug!(window_end = window.stop, alive = store.feeder_alive(), "snapshot decoded");
    Ok(())
}

/// Best-effort read of a hwmon temperature input (millidegrees Celsius).
fn read_temperature(path: &Path) -> Option<f64> {
    let text = fs::read_to_string(path).ok()?;
    let millis: f64 = text.trim().parse().ok()?;
    Some(millis / 1000.0)
}
