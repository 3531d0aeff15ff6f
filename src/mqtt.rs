//! MQTT session handling
//!
//! Wraps a single rumqttc session: connect with a pre-registered last
//! will, drive the protocol event loop in a background task, publish
//! with a bounded wait for the broker's acknowledgment, disconnect with
//! a grace period. The session is created once at startup and never
//! re-established: a lost connection ends the run.

use crate::config::{BridgeConfig, ACK_TIMEOUT, CONNECT_TIMEOUT, DISCONNECT_GRACE, KEEP_ALIVE};
use crate::publish::{Broker, NOT_RUNNING_PAYLOAD};
use anyhow::{bail, Context, Result};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Lost,
}

pub struct MqttSession {
    client: AsyncClient,
    state: watch::Receiver<SessionState>,
    acks: watch::Receiver<u64>,
    event_loop: JoinHandle<()>,
}

impl MqttSession {
    /// Connect to the broker with the "not running" last will scoped to
    /// `will_topic`. Fails if no CONNACK arrives within the timeout.
    pub async fn connect(config: &BridgeConfig, will_topic: &str) -> Result<Self> {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if let Some(user) = &config.username {
            options.set_credentials(user, config.password.clone().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            will_topic,
            NOT_RUNNING_PAYLOAD,
            QoS::AtLeastOnce,
            false,
        ));

        let (client, mut event_loop) = AsyncClient::new(options, 10);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (ack_tx, ack_rx) = watch::channel(0u64);

        let handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("connected to MQTT broker");
                        let _ = state_tx.send(SessionState::Connected);
                    }
                    Ok(Event::Incoming(Incoming::PubAck(_))) => {
                        ack_tx.send_modify(|acked| *acked += 1);
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("disconnect requested, stopping event loop");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // No reconnection attempt: session loss ends the run.
                        error!("connection lost: {e}");
                        let _ = state_tx.send(SessionState::Lost);
                        break;
                    }
                }
            }
        });

        let mut session = Self {
            client,
            state: state_rx,
            acks: ack_rx,
            event_loop: handle,
        };

        let connected = match timeout(
            CONNECT_TIMEOUT,
            session.state.wait_for(|s| *s != SessionState::Connecting),
        )
        .await
        {
            Ok(Ok(state)) => *state == SessionState::Connected,
            Ok(Err(_)) | Err(_) => false,
        };
        if !connected {
            bail!(
                "connect error: no CONNACK from {}:{} within {:?}",
                config.broker_host,
                config.broker_port,
                CONNECT_TIMEOUT
            );
        }
        Ok(session)
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == SessionState::Connected
    }

    /// A clonable view of the session state for the run loop to select on.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Disconnect and give the event loop a bounded grace period to
    /// flush the DISCONNECT packet.
    pub async fn disconnect(&mut self) -> Result<()> {
        let result = self.client.disconnect().await.context("disconnect error");
        if timeout(DISCONNECT_GRACE, &mut self.event_loop).await.is_err() {
            self.event_loop.abort();
        }
        result
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

impl Broker for MqttSession {
    /// Publish at QoS 1, retain off, then wait up to [`ACK_TIMEOUT`] for
    /// a PUBACK. An ack timeout is tolerated; delivery stays in flight.
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let acked_before = *self.acks.borrow();
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .with_context(|| format!("publishing to {topic} failed"))?;

        match timeout(ACK_TIMEOUT, self.acks.wait_for(|acked| *acked > acked_before)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => debug!("no puback within {ACK_TIMEOUT:?} for {topic}"),
        }
        Ok(())
    }
}
