//! Configuration types

use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::error::{ProxyError, Result};
use crate::server::WORKER_MAX;
use crate::session::ServiceEndpoint;

/// Root configuration structure
///
/// Only the fronted service endpoint is required; every other section has
/// working defaults.
///
/// # Example YAML
///
/// ```yaml
/// service:
///   address: "10.0.0.2"
///   port: 443
///
/// capture:
///   interface: any
///
/// workers:
///   count: 4
///   overflow: block
///
/// session:
///   idle_timeout_secs: 300
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The service whose traffic the proxy observes
    pub service: ServiceConfig,

    /// Packet capture configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Session table configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// TLS credential pool configuration
    #[serde(default)]
    pub tls: TlsPoolConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Build a default configuration for a service endpoint.
    ///
    /// This is what the CLI uses when started without a config file.
    pub fn with_service(address: impl Into<String>, port: u16) -> Self {
        Self {
            service: ServiceConfig {
                address: address.into(),
                port,
            },
            capture: CaptureConfig::default(),
            workers: WorkerConfig::default(),
            session: SessionConfig::default(),
            tls: TlsPoolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.service.endpoint().map_err(|e| e.to_string())?;
        if self.service.port == 0 {
            return Err("service.port must be non-zero".to_string());
        }

        if self.workers.count == 0 || self.workers.count > WORKER_MAX {
            return Err(format!(
                "workers.count must be between 1 and {}",
                WORKER_MAX
            ));
        }
        if self.workers.queue_depth == 0 {
            return Err("workers.queue_depth must be non-zero".to_string());
        }

        if self.session.max_sessions == 0 {
            return Err("session.max_sessions must be non-zero".to_string());
        }
        if self.session.sweep_interval_secs == 0 {
            return Err("session.sweep_interval_secs must be non-zero".to_string());
        }

        self.tls.validate()?;

        Ok(())
    }
}

/// The fronted service endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service IP address; `0.0.0.0` or `::` matches any local address
    pub address: String,
    /// Service port
    pub port: u16,
}

impl ServiceConfig {
    /// Parse into a typed endpoint.
    pub fn endpoint(&self) -> Result<ServiceEndpoint> {
        let addr: IpAddr = self.address.parse().map_err(|_| {
            ProxyError::Config(format!(
                "service.address '{}' is not a valid IP address",
                self.address
            ))
        })?;
        Ok(ServiceEndpoint::new(addr, self.port))
    }
}

/// Packet capture configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Interface to capture on
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Per-packet snapshot length in bytes
    #[serde(default = "default_snaplen")]
    pub snaplen: u32,
    /// Capture in promiscuous mode
    #[serde(default)]
    pub promiscuous: bool,
    /// Read timeout in milliseconds; bounds capture-thread shutdown latency
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u32,
    /// BPF filter override; derived from the service endpoint when unset
    #[serde(default)]
    pub bpf_filter: Option<String>,
}

impl CaptureConfig {
    /// The BPF filter to install: the configured override, or a filter for
    /// the fronted service's TCP traffic.
    pub fn effective_filter(&self, service: &ServiceEndpoint) -> String {
        if let Some(ref filter) = self.bpf_filter {
            return filter.clone();
        }
        if service.addr.is_unspecified() {
            format!("tcp and port {}", service.port)
        } else {
            format!("tcp and host {} and port {}", service.addr, service.port)
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            snaplen: default_snaplen(),
            promiscuous: false,
            read_timeout_ms: default_read_timeout_ms(),
            bpf_filter: None,
        }
    }
}

/// Backpressure policy when a worker queue is full
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The capture thread waits for queue space
    #[default]
    Block,
    /// The newest segment is dropped and counted
    DropNewest,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of worker tasks (1..=WORKER_MAX)
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Bounded queue depth per worker
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// What to do when a worker queue is full
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_depth: default_queue_depth(),
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Session table configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Idle timeout in seconds before a session is reclaimed
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Interval between idle sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Maximum number of concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// TLS credential pool configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsPoolConfig {
    /// Number of server-side (virtual host) credential slots
    #[serde(default)]
    pub server_slots: usize,
    /// Number of client-side credential slots
    #[serde(default)]
    pub client_slots: usize,
    /// Server slot population
    #[serde(default)]
    pub server: Vec<SlotCredentialConfig>,
    /// Client slot population
    #[serde(default)]
    pub client: Vec<SlotCredentialConfig>,
}

impl TlsPoolConfig {
    fn validate_entries(
        entries: &[SlotCredentialConfig],
        slots: usize,
        role: &str,
    ) -> std::result::Result<(), String> {
        for entry in entries {
            if entry.slot >= slots {
                return Err(format!(
                    "tls.{} slot {} is out of range (configured {} slots)",
                    role, entry.slot, slots
                ));
            }
            if entry.cert_path.is_some() != entry.key_path.is_some() {
                return Err(format!(
                    "tls.{} slot {}: cert_path and key_path must both be specified or both omitted",
                    role, entry.slot
                ));
            }
            if entry.cert_path.is_none() && entry.ca_path.is_none() && entry.crl_path.is_none() {
                return Err(format!(
                    "tls.{} slot {}: entry configures no credential material",
                    role, entry.slot
                ));
            }
        }
        Ok(())
    }

    /// Validate slot indices and credential pairing.
    pub fn validate(&self) -> std::result::Result<(), String> {
        Self::validate_entries(&self.server, self.server_slots, "server")?;
        Self::validate_entries(&self.client, self.client_slots, "client")?;
        Ok(())
    }
}

/// Credential material for one TLS pool slot
#[derive(Debug, Clone, Deserialize)]
pub struct SlotCredentialConfig {
    /// Slot index
    pub slot: usize,
    /// End-entity certificate chain in PEM format
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// Private key in PEM format; required with `cert_path`
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Trust anchor bundle in PEM format
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// Certificate revocation list in PEM format
    #[serde(default)]
    pub crl_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter when neither --verbose nor RUST_LOG is set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_interface() -> String {
    "any".to_string()
}

fn default_snaplen() -> u32 {
    65535
}

fn default_read_timeout_ms() -> u32 {
    250
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_depth() -> usize {
    1024
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_max_sessions() -> usize {
    65536
}

fn default_log_level() -> String {
    "info".to_string()
}
