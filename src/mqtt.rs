use anyhow::{bail, Context, Result};
use log::*;
use paho_mqtt as mqtt;
use serde::Deserialize;
use serde_json::json;
use soilprobe_lib::{
    poller::{PollStatus, Poller, ReadingCache},
    protocol::SensorReading,
    sync_safe_client::SafeClient,
    transport::Transport,
};
use std::{
    fs::File,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::Duration,
};

const MQTT_APPENDIX_AVAILABILITY: &str = "availability";
const MQTT_APPENDIX_READING: &str = "reading";
const MQTT_APPENDIX_STATUS: &str = "status";

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker URI, e.g. "tcp://localhost:1883".
    #[serde(default = "default_url")]
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Random when not set.
    pub client_id: Option<String>,
    /// Optional topic level between prefix and value.
    pub entity_id: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Quality of service code to use
    #[serde(default = "default_qos")]
    qos: u8,
    #[serde(default = "default_keep_alive", with = "humantime_serde")]
    pub keep_alive: Duration,
}

fn default_url() -> String {
    String::from("tcp://localhost:1883")
}

fn default_topic_prefix() -> String {
    String::from("soilprobe")
}

fn default_qos() -> u8 {
    0
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(20)
}

impl MqttConfig {
    pub const DEFAULT_CONFIG_FILE: &'static str = "soilprobe_mqtt.yml";

    pub fn load(config_file: &str) -> Result<Self> {
        let file = File::open(config_file)
            .with_context(|| format!("Cannot open MQTT config file {config_file}"))?;
        let config: Self = serde_yaml::from_reader(file)
            .with_context(|| format!("Cannot parse MQTT config file {config_file}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.qos > 2 {
            bail!("Invalid MQTT QoS {}, expected 0, 1 or 2", self.qos);
        }
        Ok(())
    }

    pub fn qos(&self) -> i32 {
        self.qos as i32
    }

    pub fn client_id(&self) -> String {
        match &self.client_id {
            Some(client_id) => client_id.clone(),
            None => format!("soilprobe-{:08x}", rand::random::<u32>()),
        }
    }

    /// `<prefix>[/<entity_id>]/<appendix>`
    pub fn topic(&self, appendix: &str) -> String {
        match &self.entity_id {
            Some(entity_id) => format!("{}/{}/{}", self.topic_prefix, entity_id, appendix),
            None => format!("{}/{}", self.topic_prefix, appendix),
        }
    }
}

/// Topic and payload of every message published for one reading.
fn reading_messages(config: &MqttConfig, reading: &SensorReading) -> Result<Vec<(String, String)>> {
    let mut messages: Vec<_> = reading
        .iter()
        .map(|(field, value)| (config.topic(field.name()), value.to_string()))
        .collect();
    messages.push((
        config.topic(MQTT_APPENDIX_READING),
        serde_json::to_string(reading).context("Cannot serialize reading")?,
    ));
    Ok(messages)
}

fn status_payload(status: &PollStatus) -> String {
    json!({
        "phase": status.phase,
        "successes": status.successes,
        "failures": status.failures,
        "consecutive_failures": status.consecutive_failures,
        "last_error": status.last_error,
        "staleness_ms": status.staleness().map(|age| age.as_millis() as u64),
    })
    .to_string()
}

fn publish(client: &mqtt::Client, config: &MqttConfig, topic: String, payload: String) -> Result<()> {
    trace!("Publish {topic}: {payload}");
    client
        .publish(mqtt::Message::new(topic, payload, config.qos()))
        .with_context(|| "Cannot publish mqtt message")
}

fn go_online(client: &mqtt::Client, config: &MqttConfig) -> Result<()> {
    publish(
        client,
        config,
        config.topic(MQTT_APPENDIX_AVAILABILITY),
        String::from("online"),
    )
}

fn go_offline(client: &mqtt::Client, config: &MqttConfig) -> Result<()> {
    let msg = mqtt::Message::new_retained(
        config.topic(MQTT_APPENDIX_AVAILABILITY),
        "offline",
        config.qos(),
    );
    client
        .publish(msg)
        .with_context(|| "Cannot publish mqtt message")
}

fn connect(config: &MqttConfig) -> Result<mqtt::Client> {
    let create_options = mqtt::CreateOptionsBuilder::new()
        .server_uri(&config.url)
        .client_id(config.client_id())
        .finalize();
    let mut client =
        mqtt::Client::new(create_options).with_context(|| "Error creating mqtt client")?;
    client.set_timeout(Duration::from_secs(5));

    let mut conn_builder = mqtt::ConnectOptionsBuilder::new();
    let mut conn_builder = conn_builder
        .keep_alive_interval(config.keep_alive)
        .clean_session(true)
        .will_message(mqtt::Message::new_retained(
            config.topic(MQTT_APPENDIX_AVAILABILITY),
            "offline",
            config.qos(),
        ));
    if let Some(user_name) = &config.username {
        conn_builder = conn_builder.user_name(user_name);
    }
    if let Some(password) = &config.password {
        conn_builder = conn_builder.password(password);
    }

    info!("Connecting to MQTT broker {}", config.url);
    client
        .connect(conn_builder.finalize())
        .with_context(|| format!("Mqtt client unable to connect to {}", config.url))?;
    Ok(client)
}

fn publish_loop(
    client: &mqtt::Client,
    config: &MqttConfig,
    poller: &Poller,
    readings: &mpsc::Receiver<SensorReading>,
    running: &AtomicBool,
) -> Result<()> {
    let mut published = (0, 0);
    while running.load(Ordering::SeqCst) {
        match readings.recv_timeout(Duration::from_millis(200)) {
            Ok(reading) => {
                for (topic, payload) in reading_messages(config, &reading)? {
                    publish(client, config, topic, payload)?;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        let status = poller.status();
        if (status.successes, status.failures) != published {
            published = (status.successes, status.failures);
            publish(
                client,
                config,
                config.topic(MQTT_APPENDIX_STATUS),
                status_payload(&status),
            )?;
        }
    }
    Ok(())
}

/// Polls the probe and publishes every new reading and the poll status until
/// `running` is cleared.
pub fn run_daemon<T>(
    probe: SafeClient<T>,
    poll_interval: Duration,
    config_file: &str,
    running: &AtomicBool,
) -> Result<()>
where
    T: Transport + Send + 'static,
{
    let config = MqttConfig::load(config_file)?;
    trace!("MQTT config: {config:?}");
    let client = connect(&config)?;
    go_online(&client, &config)?;

    let (readings_tx, readings_rx) = mpsc::channel();
    let cache = Arc::new(ReadingCache::new());
    cache.subscribe(move |reading| {
        // The receiver is gone once the daemon is shutting down.
        let _ = readings_tx.send(*reading);
    });
    let poller =
        Poller::with_cache(probe, poll_interval, cache).context("Cannot start poller")?;

    let result = publish_loop(&client, &config, &poller, &readings_rx, running);

    info!("Stopping...");
    poller.stop();
    go_offline(&client, &config)?;
    client
        .disconnect(None)
        .with_context(|| "Error disconnect mqtt client")?;
    result
}
