//! # Telemetry Publishing
//!
//! Periodic sensor readings published on the topic granted to the
//! permanent identity. The topic template from the provisioning policy
//! is resolved once against the registered thing name and attributes;
//! each reading is stamped with local time and published at QoS 1.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use shared::config::PermanentConfig;
use shared::constants::TELEMETRY_TIMESTAMP_FORMAT;
use shared::error::ProvisionResult;
use shared::types::TelemetryMessage;

use crate::transport::Connection;

// =============================================================================
// READING SOURCE
// =============================================================================

/// Produces successive temperature readings in degrees Celsius
pub trait ReadingSource: Send {
    fn next_reading(&mut self) -> f64;
}

/// Integer random walk standing in for a real temperature probe.
///
/// Starts at zero and drifts by -1 to +2 degrees per reading.
#[derive(Debug, Default)]
pub struct SimulatedSensor {
    value: f64,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadingSource for SimulatedSensor {
    fn next_reading(&mut self) -> f64 {
        let step = rand::thread_rng().gen_range(-1..=2);
        self.value += f64::from(step);
        self.value
    }
}

// =============================================================================
// PUBLISHER
// =============================================================================

/// Publishes readings from a source at a fixed interval
pub struct TelemetryPublisher<S: ReadingSource> {
    connection: Arc<dyn Connection>,
    config: PermanentConfig,
    topic: String,
    source: S,
    interval: Duration,
}

impl<S: ReadingSource> TelemetryPublisher<S> {
    /// Create a publisher over an established permanent-identity session
    pub fn new(
        connection: Arc<dyn Connection>,
        config: PermanentConfig,
        source: S,
        interval: Duration,
    ) -> Self {
        let topic = config.telemetry_topic();
        Self {
            connection,
            config,
            topic,
            source,
            interval,
        }
    }

    /// Resolved topic readings are published on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Read the source once and publish the reading
    pub async fn publish_once(&mut self) -> ProvisionResult<()> {
        let message = TelemetryMessage {
            thing_name: self.config.device.thing_name.clone(),
            timestamp: chrono::Local::now()
                .format(TELEMETRY_TIMESTAMP_FORMAT)
                .to_string(),
            temp_c: self.source.next_reading(),
            project_name: self.config.device.project_name.clone(),
            location: self.config.device.location.clone(),
            function_type: self.config.device.function_type.clone(),
        };

        let payload = serde_json::to_vec(&message)?;
        self.connection.publish(&self.topic, payload).await?;
        debug!(topic = %self.topic, temp_c = message.temp_c, "Reading published");
        Ok(())
    }

    /// Publish readings until the connection fails.
    ///
    /// A failed publish ends the loop; the caller decides whether to
    /// restart.
    pub async fn run(mut self) -> ProvisionResult<()> {
        info!(
            topic = %self.topic,
            interval_secs = self.interval.as_secs(),
            "Starting telemetry loop"
        );
        loop {
            self.publish_once().await?;
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedConnection;
    use shared::config::{DeviceRecord, PermanentSettings};
    use std::path::PathBuf;

    struct StubSource {
        readings: Vec<f64>,
        index: usize,
    }

    impl StubSource {
        fn new(readings: Vec<f64>) -> Self {
            Self { readings, index: 0 }
        }
    }

    impl ReadingSource for StubSource {
        fn next_reading(&mut self) -> f64 {
            let reading = self.readings[self.index % self.readings.len()];
            self.index += 1;
            reading
        }
    }

    fn test_config() -> PermanentConfig {
        PermanentConfig {
            settings: PermanentSettings {
                secure_cert_path: PathBuf::from("/var/lib/agent/permanent_cert"),
                root_cert: PathBuf::from("AmazonRootCA1.pem"),
                device_cert: PathBuf::from("ab12cd34-certificate.pem.crt"),
                device_key: PathBuf::from("ab12cd34-private.pem.key"),
                iot_endpoint: "abc123-ats.iot.us-east-1.amazonaws.com".to_string(),
                iot_topic:
                    "devices/${iot:Connection.Thing.ThingName}/${iot:Connection.Thing.Attributes[ProjectName]}/data"
                        .to_string(),
                port: 8883,
                keep_alive_secs: 6,
            },
            device: DeviceRecord {
                serial_number: "ab12cd34".to_string(),
                thing_name: "iot_ab12cd34".to_string(),
                project_name: "Greenhouse".to_string(),
                function_type: "TempSensor".to_string(),
                location: "Rooftop".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_publish_once_resolves_topic_and_message_shape() {
        let connection = Arc::new(ScriptedConnection::new());
        let mut publisher = TelemetryPublisher::new(
            Arc::clone(&connection) as Arc<dyn Connection>,
            test_config(),
            StubSource::new(vec![21.5]),
            Duration::from_secs(5),
        );

        publisher.publish_once().await.unwrap();

        let publishes = connection.published();
        assert_eq!(publishes.len(), 1);
        assert_eq!(publishes[0].0, "devices/iot_ab12cd34/Greenhouse/data");

        let message: serde_json::Value = serde_json::from_slice(&publishes[0].1).unwrap();
        assert_eq!(message["ThingName"], "iot_ab12cd34");
        assert_eq!(message["TempC"], 21.5);
        assert_eq!(message["ProjectName"], "Greenhouse");
        assert_eq!(message["Location"], "Rooftop");
        assert_eq!(message["FunctionType"], "TempSensor");

        // The timestamp round-trips through the declared format.
        let timestamp = message["Timestamp"].as_str().unwrap();
        chrono::NaiveDateTime::parse_from_str(timestamp, TELEMETRY_TIMESTAMP_FORMAT).unwrap();
    }

    #[test]
    fn test_simulated_sensor_steps_stay_bounded() {
        let mut sensor = SimulatedSensor::new();
        let mut previous = 0.0;
        for _ in 0..100 {
            let reading = sensor.next_reading();
            let step = reading - previous;
            assert!((-1.0..=2.0).contains(&step), "step out of range: {step}");
            previous = reading;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_at_the_configured_interval() {
        let connection = Arc::new(ScriptedConnection::new());
        let publisher = TelemetryPublisher::new(
            Arc::clone(&connection) as Arc<dyn Connection>,
            test_config(),
            StubSource::new(vec![20.0, 21.0, 22.0]),
            Duration::from_secs(5),
        );

        let loop_task = tokio::spawn(publisher.run());
        tokio::time::sleep(Duration::from_secs(11)).await;
        loop_task.abort();

        // Readings at 0s, 5s, and 10s.
        assert_eq!(connection.published().len(), 3);
    }
}
