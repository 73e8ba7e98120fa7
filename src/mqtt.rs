//! Publishes periodic soil readings to an MQTT broker.
use anyhow::{Context, Result};
use log::*;
use paho_mqtt as mqtt;
use serde::Deserialize;
use soil_npk_lib::{protocol as proto, sync_client::SoilSensor};
use std::{fs::File, path::Path, time::Duration};

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker url, e.g. "tcp://localhost:1883".
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Client id, a random one is generated when missing.
    pub client_id: Option<String>,
    /// Prefix of all published topics.
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Quality of service code to use
    #[serde(default)]
    qos: u8,
    /// Timeout of synchronous broker calls.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_topic() -> String {
    String::from("soil")
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

impl MqttConfig {
    pub const DEFAULT_CONFIG_FILE: &'static str = "mqtt.yaml";

    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading MQTT config file from {path:?}");
        let file =
            File::open(path).with_context(|| format!("Cannot open MQTT config file {path:?}"))?;
        let config: MqttConfig = serde_yaml::from_reader(&file)
            .with_context(|| format!("Cannot parse MQTT config file {path:?}"))?;
        if config.qos > 2 {
            anyhow::bail!("Invalid MQTT qos {}, expected 0, 1 or 2", config.qos);
        }
        Ok(config)
    }

    pub fn qos(&self) -> i32 {
        self.qos as i32
    }

    fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("soilmon-{:08x}", rand::random::<u32>()))
    }

    fn topic(&self, appendix: &str) -> String {
        format!("{}/{}", self.topic, appendix)
    }
}

const MQTT_APPENDIX_AVAILABILITY: &str = "availability";
const MQTT_APPENDIX_STATE: &str = "state";

fn json_value(reading: &proto::Reading) -> serde_json::Value {
    match *reading {
        proto::Reading::Nitrogen(v)
        | proto::Reading::Phosphorus(v)
        | proto::Reading::Potassium(v)
        | proto::Reading::ElectricalConductivity(v) => v.into(),
        proto::Reading::Ph(v) => ((v as f64 * 10.0).round() / 10.0).into(),
    }
}

/// Builds the JSON state document; fields that could not be read are `null`.
fn state_payload(fields: &[(&'static str, proto::Reading)]) -> serde_json::Value {
    let mut state = serde_json::Map::new();
    for name in ["nitrogen", "phosphorus", "potassium", "ec", "ph"] {
        let value = fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, reading)| json_value(reading))
            .unwrap_or(serde_json::Value::Null);
        state.insert(name.to_string(), value);
    }
    serde_json::Value::Object(state)
}

fn connect(config: &MqttConfig) -> Result<mqtt::Client> {
    let create_opts = mqtt::CreateOptionsBuilder::new()
        .server_uri(config.url.clone())
        .client_id(config.client_id())
        .finalize();
    let mut client = mqtt::Client::new(create_opts).with_context(|| "Error creating mqtt client")?;
    client.set_timeout(config.timeout);

    let mut conn_builder = mqtt::ConnectOptionsBuilder::new();
    conn_builder
        .keep_alive_interval(Duration::from_secs(20))
        .clean_session(true)
        .will_message(mqtt::Message::new_retained(
            config.topic(MQTT_APPENDIX_AVAILABILITY),
            "offline",
            config.qos(),
        ));
    if let Some(user_name) = &config.username {
        conn_builder.user_name(user_name.clone());
    }
    if let Some(password) = &config.password {
        conn_builder.password(password.clone());
    }

    client
        .connect(conn_builder.finalize())
        .with_context(|| format!("Mqtt client unable to connect to {}", config.url))?;
    Ok(client)
}

fn publish(client: &mqtt::Client, topic: String, payload: String, qos: i32) -> Result<()> {
    trace!("Publishing {topic}: {payload}");
    client
        .publish(mqtt::Message::new(topic, payload, qos))
        .with_context(|| "Cannot publish mqtt message")
}

/// Polls the sensor forever and publishes every reading.
///
/// A failed sensor read is logged and skipped; broker errors end the daemon.
pub fn run_daemon(
    sensor: &mut SoilSensor,
    poll_interval: &Duration,
    config_file: &str,
) -> Result<()> {
    let config = MqttConfig::load(Path::new(config_file))?;
    let client = connect(&config)?;
    info!("Connected to MQTT broker {}", config.url);

    client
        .publish(mqtt::Message::new_retained(
            config.topic(MQTT_APPENDIX_AVAILABILITY),
            "online",
            config.qos(),
        ))
        .with_context(|| "Cannot publish mqtt message")?;

    loop {
        let report = sensor.read_all();
        let fields = report.fields();
        for (name, reading) in &fields {
            publish(
                &client,
                config.topic(name),
                json_value(reading).to_string(),
                config.qos(),
            )?;
        }
        publish(
            &client,
            config.topic(MQTT_APPENDIX_STATE),
            state_payload(&fields).to_string(),
            config.qos(),
        )?;
        std::thread::sleep(*poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: MqttConfig = serde_yaml::from_str("url: tcp://localhost:1883").unwrap();
        assert_eq!(config.topic, "soil");
        assert_eq!(config.qos(), 0);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.client_id().starts_with("soilmon-"));
        assert_eq!(config.topic("ph"), "soil/ph");
    }

    #[test]
    fn config_values() {
        let config: MqttConfig = serde_yaml::from_str(
            "url: tcp://broker:1883\nusername: user\nclient_id: garden\ntopic: garden/bed1\nqos: 1\ntimeout: 2s\n",
        )
        .unwrap();
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.client_id(), "garden");
        assert_eq!(config.qos(), 1);
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.topic("state"), "garden/bed1/state");
    }

    #[test]
    fn state_payload_marks_missing_fields() {
        let fields = [
            ("nitrogen", proto::Reading::Nitrogen(32)),
            ("phosphorus", proto::Reading::Phosphorus(16)),
            ("potassium", proto::Reading::Potassium(60)),
        ];
        assert_eq!(
            state_payload(&fields).to_string(),
            r#"{"ec":null,"nitrogen":32,"ph":null,"phosphorus":16,"potassium":60}"#
        );
        assert_eq!(json_value(&proto::Reading::Ph(6.8)).to_string(), "6.8");
    }
}
