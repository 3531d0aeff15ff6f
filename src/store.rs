//! Metric descriptor table and latest-value store
//!
//! Holds the fixed set of 12 sensors derived from the readsb one-minute
//! statistics window plus the feeder liveness verdict. The store has a
//! single writer (the snapshot decode path) and a single reader (the
//! publisher); it is owned by the run loop and never shared.

use crate::config::LIVENESS_TOLERANCE_SECS;

/// Number of published sensors.
pub const METRIC_COUNT: usize = 12;

/// Static sensor metadata used for discovery config messages.
#[derive(Debug, Clone, Copy)]
pub struct MetricDescriptor {
    /// Stable short name, also the JSON key in the properties payload.
    pub id: &'static str,
    /// Display name suffix shown in Home Assistant.
    pub name: &'static str,
    /// Unit of measurement.
    pub unit: &'static str,
}

/// The published sensors, in discovery emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Metric {
    Messages,
    TracksNew,
    TracksSingle,
    TracksMlat,
    TracksPosition,
    MaxDistMetric,
    MaxDistImperial,
    LocalStrong,
    LocalSignal,
    LocalNoise,
    LocalPeak,
    Temperature,
}

impl Metric {
    pub const ALL: [Metric; METRIC_COUNT] = [
        Metric::Messages,
        Metric::TracksNew,
        Metric::TracksSingle,
        Metric::TracksMlat,
        Metric::TracksPosition,
        Metric::MaxDistMetric,
        Metric::MaxDistImperial,
        Metric::LocalStrong,
        Metric::LocalSignal,
        Metric::LocalNoise,
        Metric::LocalPeak,
        Metric::Temperature,
    ];

    pub fn descriptor(self) -> &'static MetricDescriptor {
        &DESCRIPTORS[self as usize]
    }
}

static DESCRIPTORS: [MetricDescriptor; METRIC_COUNT] = [
    MetricDescriptor { id: "messages", name: "Messages", unit: "Messages" },
    MetricDescriptor { id: "tracks_new", name: "Tracking", unit: "Aircraft" },
    MetricDescriptor { id: "tracks_single", name: "Single", unit: "Aircraft" },
    MetricDescriptor { id: "tracks_mlat", name: "MLAT", unit: "Aircraft" },
    MetricDescriptor { id: "tracks_position", name: "Positions", unit: "Aircraft" },
    MetricDescriptor { id: "max_dist_metric", name: "Maximum Distance Metric", unit: "km" },
    MetricDescriptor { id: "max_dist_imp", name: "Maximum Distance Imperial", unit: "nm" },
    MetricDescriptor { id: "local_strong", name: "Strong Signals", unit: "Messages" },
    MetricDescriptor { id: "local_signal", name: "Signal", unit: "dBFS" },
    MetricDescriptor { id: "local_noise", name: "Noise", unit: "dBFS" },
    MetricDescriptor { id: "local_peak", name: "Peak", unit: "dBFS" },
    MetricDescriptor { id: "temperatur", name: "Temperature", unit: "°C" },
];

/// Latest value per sensor plus the feeder liveness flag.
///
/// Values are last-write-wins; no history is kept.
#[derive(Debug)]
pub struct MetricStore {
    values: [f64; METRIC_COUNT],
    feeder_alive: bool,
    last_window_end: Option<u64>,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricStore {
    pub fn new() -> Self {
        Self {
            values: [0.0; METRIC_COUNT],
            feeder_alive: false,
            last_window_end: None,
        }
    }

    pub fn set(&mut self, metric: Metric, value: f64) {
        self.values[metric as usize] = value;
    }

    pub fn get(&self, metric: Metric) -> f64 {
        self.values[metric as usize]
    }

    /// Whether the feeder reported within tolerance on the last snapshot.
    pub fn feeder_alive(&self) -> bool {
        self.feeder_alive
    }

    /// Record a new window-end timestamp and rederive liveness.
    ///
    /// The feeder counts as alive only when the new timestamp is at most
    /// [`LIVENESS_TOLERANCE_SECS`] past the previous one. Without a prior
    /// baseline (first snapshot after startup) or with a timestamp that
    /// moved backwards (producer restart) the feeder reads as down until
    /// the next snapshot proves the cadence.
    pub fn observe_window_end(&mut self, window_end: u64) {
        self.feeder_alive = match self.last_window_end {
            Some(prev) => match window_end.checked_sub(prev) {
                Some(delta) => delta <= LIVENESS_TOLERANCE_SECS,
                None => false,
            },
            None => false,
        };
        self.last_window_end = Some(window_end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_default_to_zero() {
        let store = MetricStore::new();
        for metric in Metric::ALL {
            assert_eq!(store.get(metric), 0.0);
        }
        assert!(!store.feeder_alive());
    }

    #[test]
    fn set_overwrites_previous_value() {
        let mut store = MetricStore::new();
        store.set(Metric::Messages, 100.0);
        store.set(Metric::Messages, 140.0);
        assert_eq!(store.get(Metric::Messages), 140.0);
    }

    #[test]
    fn first_observation_reads_down() {
        let mut store = MetricStore::new();
        store.observe_window_end(1_650_000_000);
        assert!(!store.feeder_alive());
    }

    #[test]
    fn liveness_boundary_is_inclusive_at_tolerance() {
        let mut store = MetricStore::new();
        store.observe_window_end(1000);
        store.observe_window_end(1000 + LIVENESS_TOLERANCE_SECS);
        assert!(store.feeder_alive());

        let mut store = MetricStore::new();
        store.observe_window_end(1000);
        store.observe_window_end(1000 + LIVENESS_TOLERANCE_SECS + 1);
        assert!(!store.feeder_alive());
    }

    #[test]
    fn liveness_recovers_on_next_timely_window() {
        let mut store = MetricStore::new();
        store.observe_window_end(1000);
        store.observe_window_end(1200);
        assert!(!store.feeder_alive());
        store.observe_window_end(1260);
        assert!(store.feeder_alive());
    }

    #[test]
    fn backwards_timestamp_reads_down() {
        let mut store = MetricStore::new();
        store.observe_window_end(1000);
        store.observe_window_end(1060);
        assert!(store.feeder_alive());
        store.observe_window_end(500);
        assert!(!store.feeder_alive());
    }

    #[test]
    fn descriptor_ids_are_unique() {
        for (i, a) in Metric::ALL.iter().enumerate() {
            for b in &Metric::ALL[i + 1..] {
                assert_ne!(a.descriptor().id, b.descriptor().id);
            }
        }
    }
}
