//! Configuration loading and validation for the health check proxy server

use healthcheck_proxy::types::duration_from_secs;
use healthcheck_proxy::{
    ClientAuth, HealthCheckProxySettings, ListenerDescriptor, ListenerTls, NodeIdentity,
    ProxyProtocolMode,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found in search paths")]
    FileNotFound,

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub listeners: Vec<ListenerSettings>,

    /// Identity presented to destinations that require client certificates
    #[serde(default)]
    pub node_identity: Option<NodeIdentitySettings>,

    #[serde(default)]
    pub proxy: ProxySettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.proxy.validate()?;

        let mut errors = ValidationErrors::new();
        let mut seen = HashSet::new();

        for listener in &self.listeners {
            if listener.port == 0 {
                errors.add(
                    "listeners",
                    invalid("port_out_of_range", "listener port must be 1-65535"),
                );
            }
            if !seen.insert(listener.port) {
                errors.add(
                    "listeners",
                    invalid(
                        "duplicate_listener_port",
                        format!("port {} is configured more than once", listener.port),
                    ),
                );
            }
            if let Some(ref tls) = listener.tls {
                if tls.client_auth != ClientAuth::None && tls.ca_certificates.is_none() {
                    errors.add(
                        "listeners",
                        invalid(
                            "ca_certificates_required",
                            format!(
                                "port {} requests client certificates but has no ca_certificates",
                                listener.port
                            ),
                        ),
                    );
                }
            }
            if let Some(ref proxy) = listener.health_check_proxy {
                if let Err(e) = proxy.check() {
                    errors.add("listeners", e);
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Server-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address every listener binds to
    pub bind_address: String,

    /// How long open connections may take to finish on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Longest time a connection may take to deliver its PROXY header,
    /// finish the TLS handshake and send complete HTTP/1 request headers
    #[serde(default = "default_handshake_timeout", with = "humantime_serde")]
    pub handshake_timeout: Duration,
}

/// One listener of the host server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerSettings {
    pub port: u16,

    #[serde(default)]
    pub tls: Option<ListenerTlsSettings>,

    #[serde(default)]
    pub proxy_protocol: ProxyProtocolMode,

    #[serde(default)]
    pub health_check_proxy: Option<HealthCheckProxyConfig>,
}

/// TLS material and client authentication of a listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerTlsSettings {
    pub certificate: PathBuf,
    pub private_key: PathBuf,

    /// Trust anchors for client certificates
    #[serde(default)]
    pub ca_certificates: Option<PathBuf>,

    #[serde(default)]
    pub client_auth: ClientAuth,
}

/// Health check proxy settings of a listener; timeouts are in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckProxyConfig {
    #[serde(default = "default_enable")]
    pub enable: bool,

    pub port: u16,

    #[serde(default = "default_seconds")]
    pub client_timeout: f64,

    #[serde(default = "default_seconds")]
    pub cache_expiry: f64,
}

impl HealthCheckProxyConfig {
    fn check(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(invalid(
                "port_out_of_range",
                "health check proxy port must be 1-65535",
            ));
        }
        for (name, value) in [
            ("client_timeout", self.client_timeout),
            ("cache_expiry", self.cache_expiry),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(
                    "negative_duration",
                    format!("{} must be a non-negative number of seconds", name),
                ));
            }
        }
        Ok(())
    }

    pub fn to_settings(&self) -> HealthCheckProxySettings {
        HealthCheckProxySettings {
            port: self.port,
            client_timeout: duration_from_secs(self.client_timeout),
            cache_expiry: duration_from_secs(self.cache_expiry),
        }
    }
}

/// Paths of the node's private key and certificate chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentitySettings {
    pub private_key: PathBuf,
    pub certificates: PathBuf,
}

/// Forwarding worker settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProxySettings {
    #[validate(range(min = 1, max = 10000))]
    pub queue_capacity: usize,
}

/// Prometheus endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub listen_addr: String,
}

/// OpenTelemetry export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub service_name: String,
    pub otlp_endpoint: String,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

// Default implementations

fn default_enable() -> bool {
    true
}

fn default_seconds() -> f64 {
    1.0
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            shutdown_timeout: Duration::from_secs(10),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            queue_capacity: healthcheck_proxy::worker::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9100".to_string(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "healthcheck-proxy-server".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
        }
    }
}

fn invalid(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::FileNotFound);
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/healthcheck-proxy/config.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./healthcheck-proxy.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/healthcheck-proxy/config.yaml"))
    }

    /// Listener view consumed by the port router
    pub fn to_listener_descriptors(&self) -> Vec<ListenerDescriptor> {
        self.listeners
            .iter()
            .map(|listener| ListenerDescriptor {
                port: listener.port,
                tls: listener.tls.as_ref().map(|tls| ListenerTls {
                    client_auth: tls.client_auth,
                }),
                proxy_protocol: listener.proxy_protocol,
                health_check_proxy: listener
                    .health_check_proxy
                    .as_ref()
                    .filter(|proxy| proxy.enable)
                    .map(HealthCheckProxyConfig::to_settings),
            })
            .collect()
    }

    pub fn node_identity(&self) -> Option<NodeIdentity> {
        self.node_identity.as_ref().map(|identity| NodeIdentity {
            private_key: identity.private_key.clone(),
            certificates: identity.certificates.clone(),
        })
    }

    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or("info")
    }
}
