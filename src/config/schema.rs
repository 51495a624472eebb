//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::bridge::protocol;

/// Root configuration: shared settings plus every module declaration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// `Proxy-Agent` value sent with CONNECT acknowledgements.
    pub agent_name: String,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Buffer and chunk sizes.
    pub limits: LimitsConfig,

    /// Bridge-service registry sizing.
    pub registry: RegistryConfig,

    /// Direct forward proxies.
    pub http: Vec<HttpModuleConfig>,

    /// Forward proxies that egress through a bridge service.
    pub http_agent: Vec<HttpAgentModuleConfig>,

    /// Bridge services holding destination sockets for agents.
    pub bridge_service: Vec<BridgeServiceModuleConfig>,

    /// Plain TCP port mappings.
    pub port_map: Vec<PortMapModuleConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            agent_name: "bridge-proxy".to_string(),
            observability: ObservabilityConfig::default(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            registry: RegistryConfig::default(),
            http: Vec::new(),
            http_agent: Vec::new(),
            bridge_service: Vec::new(),
            port_map: Vec::new(),
        }
    }
}

impl ProxyConfig {
    /// Total number of declared modules.
    pub fn module_count(&self) -> usize {
        self.http.len() + self.http_agent.len() + self.bridge_service.len() + self.port_map.len()
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Destination connect timeout in seconds.
    pub connect_secs: u64,

    /// Open/write/close round trips against a bridge service, in seconds.
    /// Reads are long polls and never time out.
    pub bridge_request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            bridge_request_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn bridge_request(&self) -> Duration {
        Duration::from_secs(self.bridge_request_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest request (headers plus declared body) buffered before routing.
    pub max_request_bytes: usize,

    /// Bytes requested per socket read.
    pub read_chunk_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: 8 * 1024 * 1024,
            read_chunk_size: 40 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Entry count above which `open` sweeps idle entries.
    pub max_entries: usize,

    /// Idle age, in seconds, after which an entry may be swept.
    pub idle_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            idle_timeout_secs: 600,
        }
    }
}

impl RegistryConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Direct forward proxy module.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpModuleConfig {
    pub name: String,

    /// Listen host; empty means all interfaces.
    #[serde(default)]
    pub host: String,

    pub port: u16,

    /// Maximum concurrent connections (backpressure).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Forward proxy module whose destinations are reached through a bridge service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpAgentModuleConfig {
    pub name: String,

    #[serde(default)]
    pub host: String,

    pub port: u16,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Bridge service origin, e.g. `http://10.0.0.5:9000`.
    pub bridge_url: String,

    /// Password presented to the bridge service.
    #[serde(default)]
    pub password: String,

    /// Prefix the bridge service mounts its routes under.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

/// Bridge service module.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeServiceModuleConfig {
    pub name: String,

    #[serde(default)]
    pub host: String,

    pub port: u16,

    /// Required bearer password; empty disables authentication.
    #[serde(default)]
    pub password: String,

    /// Route prefixes the control protocol is mounted under.
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,
}

/// TCP port mapping module.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortMapModuleConfig {
    pub name: String,

    #[serde(default)]
    pub host: String,

    pub port: u16,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    pub target_host: String,

    pub target_port: u16,
}

fn default_max_connections() -> usize {
    10_000
}

fn default_prefix() -> String {
    protocol::DEFAULT_PREFIX.to_string()
}

fn default_prefixes() -> Vec<String> {
    vec![default_prefix()]
}
