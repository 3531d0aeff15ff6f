//! Home Assistant discovery publishing
//!
//! Emits three message classes per cycle:
//! - one sensor discovery config per metric (12 messages)
//! - one binary-sensor discovery config for the feeder "running" status
//! - one combined properties state message with all current values
//!
//! Configs are re-sent every cycle: nothing is retained, so Home
//! Assistant would forget the sensors across a server restart otherwise.
//! Publishing goes through the [`Broker`] trait so tests can record
//! messages without a broker.

use crate::config::{MAX_PAYLOAD_SIZE, MAX_TOPIC_SIZE};
use crate::store::{Metric, MetricStore};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

/// Payload announcing the client is not running. Used both as the
/// last-will message and, independently built, on expected disconnect.
pub const NOT_RUNNING_PAYLOAD: &str = "{\"running\":\"0\"}";

/// Publish-only view of the MQTT session.
#[allow(async_fn_in_trait)]
pub trait Broker {
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Sensor discovery config (Home Assistant MQTT discovery schema).
#[derive(Debug, Serialize)]
struct SensorConfig {
    name: String,
    unique_id: String,
    state_topic: String,
    val_tpl: String,
    icon: &'static str,
    platform: &'static str,
    unit_of_measurement: &'static str,
}

/// Binary-sensor discovery config for the feeder status.
#[derive(Debug, Serialize)]
struct StatusConfig {
    name: String,
    unique_id: String,
    device_class: &'static str,
    state_topic: String,
    val_tpl: &'static str,
    payload_on: &'static str,
    payload_off: &'static str,
    platform: &'static str,
}

pub struct Publisher {
    client_id: String,
    topic_prefix: String,
    binary_sensor_root: String,
}

impl Publisher {
    pub fn new(client_id: &str, topic_prefix: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            topic_prefix: topic_prefix.to_string(),
            binary_sensor_root: crate::config::BINARY_SENSOR_ROOT.to_string(),
        }
    }

    /// The single state topic all sensors read from.
    pub fn properties_topic(&self) -> String {
        format!("{}/{}/properties", self.topic_prefix, self.client_id)
    }

    // HASS auto discover: <discovery_prefix>/<component>/[<node_id>/]<object_id>/config
    fn config_topic(&self, root: &str, object_id: &str) -> String {
        let topic = format!("{}/{}/{}/config", root, self.client_id, object_id);
        debug_assert!(topic.len() <= MAX_TOPIC_SIZE);
        topic
    }

    fn sensor_config(&self, metric: Metric) -> Result<(String, String)> {
        let desc = metric.descriptor();
        let config = SensorConfig {
            name: format!("{} {}", self.client_id, desc.name),
            unique_id: format!("{}.{}", self.client_id, desc.id),
            state_topic: self.properties_topic(),
            val_tpl: format!("{{{{value_json.{}}}}}", desc.id),
            icon: "mdi:airplane",
            platform: "mqtt",
            unit_of_measurement: desc.unit,
        };
        let payload = serde_json::to_string(&config).context("serializing sensor config failed")?;
        Ok((self.config_topic(&self.topic_prefix, desc.id), payload))
    }

    fn status_config(&self) -> Result<(String, String)> {
        let config = StatusConfig {
            name: format!("{} Status", self.client_id),
            unique_id: format!("{}.running", self.client_id),
            device_class: "running",
            state_topic: self.properties_topic(),
            val_tpl: "{{value_json.running}}",
            payload_on: "1",
            payload_off: "0",
            platform: "mqtt",
        };
        let payload = serde_json::to_string(&config).context("serializing status config failed")?;
        Ok((self.config_topic(&self.binary_sensor_root, "running"), payload))
    }

    /// Combined state payload: every metric formatted to one decimal
    /// place plus the liveness flag as "0"/"1".
    pub fn properties_payload(&self, store: &MetricStore) -> String {
        let mut fields = Map::new();
        for metric in Metric::ALL {
            let desc = metric.descriptor();
            fields.insert(
                desc.id.to_string(),
                Value::String(format!("{:.1}", store.get(metric))),
            );
        }
        let running = if store.feeder_alive() { "1" } else { "0" };
        fields.insert("running".to_string(), Value::String(running.to_string()));
        Value::Object(fields).to_string()
    }

    /// Publish one full cycle: discovery configs, status config, state.
    ///
    /// Returns the number of failed publishes. Failures are logged and
    /// never stop the cycle; the next snapshot retries naturally.
    pub async fn publish_cycle<B: Broker>(&self, broker: &mut B, store: &MetricStore) -> usize {
        let mut failed = 0;

        for metric in Metric::ALL {
            if !self.send(broker, self.sensor_config(metric), "stats config").await {
                failed += 1;
            }
        }
        if !self.send(broker, self.status_config(), "status config").await {
            failed += 1;
        }
        let state = Ok((self.properties_topic(), self.properties_payload(store)));
        if !self.send(broker, state, "properties").await {
            failed += 1;
        }

        debug!(failed, "publish cycle complete");
        failed
    }

    /// Final properties message for an expected disconnect. Built
    /// independently of the last will, which covers unexpected loss.
    pub async fn publish_offline<B: Broker>(&self, broker: &mut B) -> Result<()> {
        let payload = json!({ "running": "0" }).to_string();
        broker
            .publish(&self.properties_topic(), payload.into_bytes())
            .await
            .context("publish disconnect error")
    }

    async fn send<B: Broker>(
        &self,
        broker: &mut B,
        message: Result<(String, String)>,
        what: &str,
    ) -> bool {
        let (topic, payload) = match message {
            Ok(message) => message,
            Err(e) => {
                error!("building {what} failed: {e:#}");
                return false;
            }
        };
        debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);
        match broker.publish(&topic, payload.into_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                error!("publish {what} error: {e:#}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::METRIC_COUNT;

    fn publisher() -> Publisher {
        Publisher::new("feeder001", "homeassistant/sensor")
    }

    #[test]
    fn properties_topic_shape() {
        assert_eq!(
            publisher().properties_topic(),
            "homeassistant/sensor/feeder001/properties"
        );
    }

    #[test]
    fn sensor_config_topic_and_payload() {
        let (topic, payload) = publisher().sensor_config(Metric::Messages).unwrap();
        assert_eq!(topic, "homeassistant/sensor/feeder001/messages/config");

        let config: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(config["name"], "feeder001 Messages");
        assert_eq!(config["unique_id"], "feeder001.messages");
        assert_eq!(config["state_topic"], "homeassistant/sensor/feeder001/properties");
        assert_eq!(config["val_tpl"], "{{value_json.messages}}");
        assert_eq!(config["icon"], "mdi:airplane");
        assert_eq!(config["platform"], "mqtt");
        assert_eq!(config["unit_of_measurement"], "Messages");
    }

    #[test]
    fn status_config_is_a_binary_sensor() {
        let (topic, payload) = publisher().status_config().unwrap();
        assert_eq!(topic, "homeassistant/binary_sensor/feeder001/running/config");

        let config: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(config["device_class"], "running");
        assert_eq!(config["val_tpl"], "{{value_json.running}}");
        assert_eq!(config["payload_on"], "1");
        assert_eq!(config["payload_off"], "0");
    }

    #[test]
    fn all_topics_fit_the_mqtt_limit() {
        let publisher = publisher();
        for metric in Metric::ALL {
            let (topic, _) = publisher.sensor_config(metric).unwrap();
            assert!(topic.len() <= MAX_TOPIC_SIZE);
        }
        assert!(publisher.status_config().unwrap().0.len() <= MAX_TOPIC_SIZE);
        assert!(publisher.properties_topic().len() <= MAX_TOPIC_SIZE);
    }

    #[test]
    fn all_payloads_fit_the_mqtt_limit() {
        let publisher = publisher();
        let mut store = MetricStore::new();
        for metric in Metric::ALL {
            store.set(metric, f64::MAX);
            let (_, payload) = publisher.sensor_config(metric).unwrap();
            assert!(payload.len() <= MAX_PAYLOAD_SIZE);
        }
        assert!(publisher.status_config().unwrap().1.len() <= MAX_PAYLOAD_SIZE);
        assert!(publisher.properties_payload(&store).len() <= MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn properties_payload_has_all_fields_with_one_decimal() {
        let mut store = MetricStore::new();
        store.set(Metric::Messages, 140.0);
        store.set(Metric::Temperature, 48.25);

        let payload = publisher().properties_payload(&store);
        let value: Value = serde_json::from_str(&payload).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), METRIC_COUNT + 1);
        assert_eq!(object["messages"], "140.0");
        assert_eq!(object["temperatur"], "48.2");
        assert_eq!(object["tracks_new"], "0.0");
        assert_eq!(object["running"], "0");
    }

    #[test]
    fn properties_payload_reports_liveness() {
        let mut store = MetricStore::new();
        store.observe_window_end(1000);
        store.observe_window_end(1060);
        assert!(store.feeder_alive());

        let payload = publisher().properties_payload(&store);
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["running"], "1");
    }
}
