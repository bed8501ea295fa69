use anyhow::{Context, Result};
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use shield_node::config::ShieldConfig;
use shield_node::netdev::{detect_default_interface, ProcNetDev};
use shield_node::oci::{load_profile, stage_credentials, ApiSigner, NsgFirewall, NsgParameters, OciNsgApi};
use shield_node::radar::{AttackRadar, ShutdownSignal};
use shield_node::rcon::TcpRconConnector;
use shield_node::shield::Shield;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shield_node=info".into()),
        )
        .with_target(false)
        .init();

    info!("Starting Shield Node v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from file if available, otherwise use defaults
    let mut config = match ShieldConfig::from_file("config/default") {
        Ok(config) => {
            info!("Configuration loaded from config/default.toml");
            config
        }
        Err(e) => {
            warn!("Failed to load config file: {}, using defaults", e);
            ShieldConfig::default()
        }
    };
    config.apply_env_overrides();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    if config.metrics.enabled {
        let addr: SocketAddr = config.metrics.listen_addr.parse()?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        initialize_metrics();
        info!(listen_addr = %addr, "Prometheus exporter started");
    }

    // Stage cloud credentials and build the firewall control plane
    let oci_dir = oci_config_dir()?;
    let config_path = stage_credentials(&oci_dir)?;
    let profile = load_profile(&config_path)?;
    let signer = ApiSigner::from_profile(&profile)?;
    let nsg_api = OciNsgApi::new(&profile.region, signer);
    let firewall = Arc::new(NsgFirewall::new(
        Box::new(nsg_api),
        NsgParameters {
            compartment_id: config.oracle.compartment_id.clone(),
            vcn_id: config.oracle.vcn_id.clone(),
            nsg_name: config.oracle.nsg_name.clone(),
        },
    ));

    let rcon = Arc::new(TcpRconConnector::new(
        config.rcon_address(),
        config.rcon.password.clone(),
    ));
    let shield = Shield::new(config.shield_duration(), rcon, firewall);

    let source = Arc::new(ProcNetDev::new());
    let iface = match config.monitor.interface.clone() {
        Some(iface) => iface,
        None => {
            let detected = detect_default_interface(source.as_ref())?;
            info!(iface = %detected, "No interface configured, auto-detected");
            detected
        }
    };

    let radar = AttackRadar::new(
        iface,
        source,
        config.monitor.max_bytes_per_interval,
        config.sustained_duration(),
        config.poll_interval(),
        Arc::new(shield),
    );

    // Run the polling loop until SIGINT/SIGTERM
    let shutdown = ShutdownSignal::new();
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            info!("Shutdown signal received");
            shutdown.request_shutdown();
        });
    }

    radar.run(shutdown).await;
    info!("Shield node stopped");
    Ok(())
}

fn oci_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".oci"))
}

fn initialize_metrics() {
    describe_counter!("radar_attacks_detected", "Sustained traffic surges detected");
    describe_counter!("radar_sample_errors", "Failed interface counter reads");
    describe_counter!("shield_activation_attempts", "Detections that tried to raise the shield");
    describe_counter!("shield_activations", "Successful shield activations");
    describe_counter!("shield_activation_failures", "Aborted shield activations");
    describe_counter!("shield_deactivations", "Completed shield rollbacks");
    describe_counter!("shield_rollback_failures", "Failed ingress restores");
    describe_counter!(
        "shield_detections_suppressed",
        "Detections ignored while an episode was active"
    );
}
