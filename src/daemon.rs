//! Run loop and shutdown sequencing
//!
//! Connect, watch, then loop until a termination signal, session loss
//! or disappearance of the statistics source. On the way out a final
//! "not running" properties message is published while still connected;
//! the last will covers the case where we never get that far.

use crate::config::{BridgeConfig, SNAPSHOT_FILE};
use crate::mqtt::{MqttSession, SessionState};
use crate::publish::{Broker, Publisher};
use crate::snapshot;
use crate::store::MetricStore;
use crate::watch::{self, WatchEvent};
use anyhow::{bail, Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

enum StopReason {
    Signal,
    SessionLost,
    SourceGone,
}

/// Decode the freshest snapshot, then publish a full cycle.
///
/// A failed decode keeps the previous values but never suppresses the
/// cycle: discovery configs must go out on every notification or a
/// restarted Home Assistant would not re-register the sensors until a
/// good snapshot happens to arrive.
pub async fn handle_snapshot<B: Broker>(
    config: &BridgeConfig,
    publisher: &Publisher,
    broker: &mut B,
    store: &mut MetricStore,
) -> usize {
    if let Err(e) = snapshot::refresh(&config.snapshot_path(), &config.temperature_path, store) {
        warn!("keeping previous values: {e}");
    }
    publisher.publish_cycle(broker, store).await
}

pub async fn run(config: BridgeConfig) -> Result<()> {
    let publisher = Publisher::new(&config.client_id, &config.topic_prefix);

    let mut session = MqttSession::connect(&config, &publisher.properties_topic()).await?;

    // The watch is established only after a successful connection, so a
    // snapshot can never arrive without a session to publish it on.
    let (_watcher, mut signals) = watch::watch(&config.snapshot_dir, SNAPSHOT_FILE)?;

    let mut sigint = signal(SignalKind::interrupt()).context("signal registration failed")?;
    let mut sigterm = signal(SignalKind::terminate()).context("signal registration failed")?;
    let mut session_state = session.state_watch();

    let mut store = MetricStore::new();
    let mut publish_errors = 0usize;

    info!(
        "watching {} for new statistics, publishing as {}",
        config.snapshot_dir.display(),
        config.client_id
    );

    let reason = loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("caught SIGINT, shutting down..");
                break StopReason::Signal;
            }
            _ = sigterm.recv() => {
                info!("caught SIGTERM, shutting down..");
                break StopReason::Signal;
            }
            _ = session_state.wait_for(|s| *s == SessionState::Lost) => {
                break StopReason::SessionLost;
            }
            event = signals.next() => match event {
                Some(WatchEvent::SnapshotReady) => {
                    publish_errors +=
                        handle_snapshot(&config, &publisher, &mut session, &mut store).await;
                }
                Some(WatchEvent::SourceGone) => {
                    error!("{SNAPSHOT_FILE} deleted. readsb stopped?");
                    break StopReason::SourceGone;
                }
                None => {
                    error!("snapshot watcher stopped unexpectedly");
                    break StopReason::SourceGone;
                }
            },
        }
    };

    // Expected disconnect: announce "not running" ourselves. The last
    // will is delivered by the broker only on unexpected loss. A failed
    // final publish is logged but does not affect the exit status.
    if session.is_connected() {
        if let Err(e) = publisher.publish_offline(&mut session).await {
            error!("{e:#}");
        }
    }
    let mut disconnect_failed = false;
    if let Err(e) = session.disconnect().await {
        error!("{e:#}");
        disconnect_failed = true;
    }

    exit_outcome(reason, publish_errors, disconnect_failed)
}

fn exit_outcome(reason: StopReason, publish_errors: usize, disconnect_failed: bool) -> Result<()> {
    match reason {
        StopReason::Signal if publish_errors > 0 => {
            bail!("{publish_errors} publishes failed during the run")
        }
        StopReason::Signal if disconnect_failed => bail!("disconnect failed"),
        StopReason::Signal => Ok(()),
        StopReason::SessionLost => bail!("MQTT session lost"),
        StopReason::SourceGone => bail!("statistics source disappeared"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_signal_exits_success() {
        assert!(exit_outcome(StopReason::Signal, 0, false).is_ok());
    }

    #[test]
    fn publish_errors_degrade_a_clean_exit() {
        assert!(exit_outcome(StopReason::Signal, 3, false).is_err());
    }

    #[test]
    fn disconnect_failure_degrades_a_clean_exit() {
        assert!(exit_outcome(StopReason::Signal, 0, true).is_err());
    }

    #[test]
    fn session_loss_and_source_gone_exit_failure() {
        assert!(exit_outcome(StopReason::SessionLost, 0, false).is_err());
        assert!(exit_outcome(StopReason::SourceGone, 0, false).is_err());
    }
}
