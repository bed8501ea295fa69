use crate::secret::Secret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Main configuration for the shield node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldConfig {
    /// Interface monitoring and detection thresholds
    pub monitor: MonitorConfig,
    /// Mitigation episode settings
    pub shield: ProtectionConfig,
    /// Game-server remote console settings
    pub rcon: RconConfig,
    /// Oracle Cloud network security group settings
    pub oracle: OracleConfig,
    /// Metrics exporter settings
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Detection thresholds for the monitored interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interface to watch; auto-detected when unset
    pub interface: Option<String>,
    /// Received-byte delta per poll interval that counts as an excursion
    pub max_bytes_per_interval: u64,
    /// How long the excursion must hold before an attack event fires
    pub sustained_seconds: u64,
    /// Poll interval in seconds
    pub poll_interval_seconds: u64,
}

/// Mitigation episode settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionConfig {
    /// How long the ingress restriction stays up before automatic rollback
    pub duration_seconds: u64,
}

/// Game-server remote console settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RconConfig {
    /// Game server address
    pub host: String,
    /// Game server RCON port
    pub port: u16,
    /// RCON password
    pub password: Secret,
}

/// Oracle Cloud network security group settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Compartment holding the VCN
    pub compartment_id: String,
    /// VCN the security group belongs to
    pub vcn_id: String,
    /// Display name of the security group to rewrite
    pub nsg_name: String,
}

/// Metrics exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus scrape endpoint
    pub enabled: bool,
    /// Exporter listen address
    pub listen_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is unset
    pub level: String,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig {
                interface: None,
                max_bytes_per_interval: 100_000_000,
                sustained_seconds: 10,
                poll_interval_seconds: 1,
            },
            shield: ProtectionConfig {
                duration_seconds: 180,
            },
            rcon: RconConfig {
                host: "127.0.0.1".to_string(),
                port: 27015,
                password: Secret::default(),
            },
            oracle: OracleConfig {
                compartment_id: String::new(),
                vcn_id: String::new(),
                nsg_name: String::new(),
            },
            metrics: MetricsConfig {
                enabled: false,
                listen_addr: "127.0.0.1:9090".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl ShieldConfig {
    /// Load configuration from file with SHIELD__ environment overrides
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SHIELD").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Save configuration to file
    #[allow(dead_code)]
    pub fn save_to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Apply the legacy flat environment variables the daemon has always
    /// honored, on top of whatever the file provided.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(iface) = std::env::var("IFACE") {
            if !iface.is_empty() {
                self.monitor.interface = Some(iface);
            }
        }
        if let Ok(max_bytes) = std::env::var("MAXBYTES") {
            if let Ok(parsed) = max_bytes.parse() {
                self.monitor.max_bytes_per_interval = parsed;
            }
        }
        if let Ok(host) = std::env::var("SRCDS_IP") {
            if !host.is_empty() {
                self.rcon.host = host;
            }
        }
        if let Ok(port) = std::env::var("SRCDS_PORT") {
            if let Ok(parsed) = port.parse() {
                self.rcon.port = parsed;
            }
        }
        if let Ok(password) = std::env::var("SRCDS_PASSWORD") {
            if !password.is_empty() {
                self.rcon.password = Secret::new(password);
            }
        }
        if let Ok(compartment) = std::env::var("OCI_COMPARTMENT_ID") {
            if !compartment.is_empty() {
                self.oracle.compartment_id = compartment;
            }
        }
        if let Ok(vcn) = std::env::var("OCI_VCN_ID") {
            if !vcn.is_empty() {
                self.oracle.vcn_id = vcn;
            }
        }
        if let Ok(nsg) = std::env::var("OCI_NSG_NAME") {
            if !nsg.is_empty() {
                self.oracle.nsg_name = nsg;
            }
        }
        info!("Applied environment variable overrides");
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.monitor.poll_interval_seconds == 0 {
            return Err("Poll interval cannot be 0".to_string());
        }

        if self.shield.duration_seconds == 0 {
            return Err("Shield duration cannot be 0".to_string());
        }

        if self.rcon.port == 0 {
            return Err("RCON port cannot be 0".to_string());
        }

        if self.rcon.password.is_empty() {
            return Err("RCON password must be set".to_string());
        }

        if self.oracle.compartment_id.is_empty()
            || self.oracle.vcn_id.is_empty()
            || self.oracle.nsg_name.is_empty()
        {
            return Err(
                "Oracle compartment_id, vcn_id and nsg_name must all be set".to_string(),
            );
        }

        if self.metrics.enabled && self.metrics.listen_addr.parse::<std::net::SocketAddr>().is_err()
        {
            return Err(format!(
                "Invalid metrics listen address: {}",
                self.metrics.listen_addr
            ));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.poll_interval_seconds)
    }

    pub fn sustained_duration(&self) -> Duration {
        Duration::from_secs(self.monitor.sustained_seconds)
    }

    pub fn shield_duration(&self) -> Duration {
        Duration::from_secs(self.shield.duration_seconds)
    }

    /// Remote console endpoint in host:port form
    pub fn rcon_address(&self) -> String {
        format!("{}:{}", self.rcon.host, self.rcon.port)
    }
}
