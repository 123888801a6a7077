//! # Device Agent CLI
//!
//! Command-line tool for device lifecycle operations:
//! - Provision a permanent identity from the factory claim credentials
//! - Publish periodic telemetry with the permanent identity
//! - Verify end-to-end delivery on the telemetry topic
//!
//! ## Usage
//!
//! ```bash
//! # Trade the claim credentials for a permanent identity
//! device-agent provision -p Greenhouse -f TempSensor -l Rooftop
//!
//! # Publish a reading every 5 seconds
//! device-agent publish -c /var/lib/agent/permanent_cert/perm_config.toml
//!
//! # Watch the topic while sending test readings
//! device-agent verify -c /var/lib/agent/permanent_cert/perm_config.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::Rng;
use tracing::info;

use device_agent::{
    ConnectOptions, Connection, CredentialWriter, DeviceParameters, FleetProvisioner, MachineId,
    MqttConnection, SimulatedSensor, TelemetryPublisher, TlsIdentity,
};
use shared::config::{DeviceRecord, PermanentConfig, ProvisionConfig};
use shared::constants::{
    telemetry_client_id, DEFAULT_CLAIM_CONFIG_FILE, DEFAULT_TELEMETRY_INTERVAL_SECS,
    PERMANENT_CONFIG_FILE,
};

#[derive(Parser)]
#[command(name = "device-agent")]
#[command(about = "Fleet provisioning and telemetry agent for IoT devices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a permanent identity using the claim credentials
    Provision {
        /// Claim configuration file
        #[arg(long, short = 'c', default_value = DEFAULT_CLAIM_CONFIG_FILE)]
        config: PathBuf,

        /// Project classification registered for this device
        #[arg(long, short = 'p')]
        project: String,

        /// Function classification registered for this device
        #[arg(long, short = 'f')]
        function: String,

        /// Location classification registered for this device
        #[arg(long, short = 'l')]
        location: String,
    },

    /// Publish periodic telemetry with the permanent identity
    Publish {
        /// Permanent configuration file written by `provision`
        #[arg(long, short = 'c', default_value = PERMANENT_CONFIG_FILE)]
        config: PathBuf,

        /// Seconds between readings
        #[arg(long, default_value_t = DEFAULT_TELEMETRY_INTERVAL_SECS)]
        interval_secs: u64,
    },

    /// Subscribe to the telemetry topic and send test readings
    Verify {
        /// Permanent configuration file written by `provision`
        #[arg(long, short = 'c', default_value = PERMANENT_CONFIG_FILE)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Provision {
            config,
            project,
            function,
            location,
        } => {
            provision_device(&config, &project, &function, &location).await?;
        }
        Commands::Publish {
            config,
            interval_secs,
        } => {
            publish_telemetry(&config, interval_secs).await?;
        }
        Commands::Verify { config } => {
            verify_telemetry(&config).await?;
        }
    }

    Ok(())
}

async fn provision_device(
    config_path: &Path,
    project: &str,
    function: &str,
    location: &str,
) -> Result<()> {
    let config = ProvisionConfig::load(config_path)?;
    let settings = config.settings;

    let machine_id = MachineId::load(&settings.machine_id_path).await?;
    info!(serial = %machine_id, "Provisioning device");

    let tls = TlsIdentity::from_files(
        &settings.root_cert_path(),
        &settings.claim_cert_path(),
        &settings.claim_key_path(),
    )
    .await?;

    let connection = Arc::new(
        MqttConnection::connect(ConnectOptions {
            endpoint: settings.iot_endpoint.clone(),
            port: settings.port,
            client_id: machine_id.as_str().to_string(),
            keep_alive: Duration::from_secs(settings.keep_alive_secs),
            tls,
        })
        .await?,
    );

    let parameters = DeviceParameters {
        serial_number: machine_id.as_str().to_string(),
        project_name: project.to_string(),
        function_type: function.to_string(),
        location: location.to_string(),
    };

    let provisioner = FleetProvisioner::new(
        Arc::clone(&connection) as Arc<dyn Connection>,
        settings.provisioning_template_name.clone(),
        parameters,
    );
    let (identity, registration) = provisioner.run().await?;

    let record = DeviceRecord {
        serial_number: machine_id.as_str().to_string(),
        thing_name: registration.thing_name.clone(),
        project_name: project.to_string(),
        function_type: function.to_string(),
        location: location.to_string(),
    };
    let permanent = CredentialWriter::new(settings)
        .persist(&identity, record)
        .await?;

    connection.disconnect().await;

    let record_path = permanent.settings.secure_cert_path.join(PERMANENT_CONFIG_FILE);
    println!("\n✓ Device provisioned successfully!");
    println!("  Thing name: {}", permanent.device.thing_name);
    println!("  Telemetry topic: {}", permanent.telemetry_topic());
    println!("  Credential bundle: {}", permanent.settings.secure_cert_path.display());
    println!("\nRun 'device-agent publish -c {}' to start publishing.", record_path.display());

    Ok(())
}

async fn publish_telemetry(config_path: &Path, interval_secs: u64) -> Result<()> {
    let config = PermanentConfig::load(config_path)?;

    let tls = TlsIdentity::from_files(
        &config.settings.root_cert,
        &config.settings.device_cert,
        &config.settings.device_key,
    )
    .await?;

    let connection = Arc::new(
        MqttConnection::connect(ConnectOptions {
            endpoint: config.settings.iot_endpoint.clone(),
            port: config.settings.port,
            client_id: telemetry_client_id(&config.device.serial_number),
            keep_alive: Duration::from_secs(config.settings.keep_alive_secs),
            tls,
        })
        .await?,
    );

    println!("\n✓ Connected with the permanent identity");
    println!("  Thing name: {}", config.device.thing_name);
    println!("  Interval: {interval_secs}s (Ctrl-C to stop)");

    let publisher = TelemetryPublisher::new(
        Arc::clone(&connection) as Arc<dyn Connection>,
        config,
        SimulatedSensor::new(),
        Duration::from_secs(interval_secs),
    );
    publisher.run().await?;

    Ok(())
}

async fn verify_telemetry(config_path: &Path) -> Result<()> {
    let config = PermanentConfig::load(config_path)?;
    let topic = config.telemetry_topic();

    let tls = TlsIdentity::from_files(
        &config.settings.root_cert,
        &config.settings.device_cert,
        &config.settings.device_key,
    )
    .await?;

    let connection = MqttConnection::connect(ConnectOptions {
        endpoint: config.settings.iot_endpoint.clone(),
        port: config.settings.port,
        client_id: telemetry_client_id(&config.device.serial_number),
        keep_alive: Duration::from_secs(config.settings.keep_alive_secs),
        tls,
    })
    .await?;

    connection
        .subscribe(
            &topic,
            Box::new(|topic, payload| {
                println!("Received on '{}': {}", topic, String::from_utf8_lossy(payload));
            }),
        )
        .await?;

    println!("\n✓ Subscribed to '{topic}'");
    println!("  Sending a test reading every second (Ctrl-C to stop)");

    // Simulated room temperatures in Fahrenheit, echoed back through the
    // subscription above when delivery works end to end.
    loop {
        let reading = rand::thread_rng().gen_range(70..=95);
        let message = serde_json::json!({ "TempF": reading.to_string() });
        connection.publish(&topic, serde_json::to_vec(&message)?).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
