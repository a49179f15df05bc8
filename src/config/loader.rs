//! Configuration loader

use super::Config;
use crate::error::{ProxyError, Result};
use std::path::Path;

/// Load configuration from a YAML file
///
/// Also applies TAPPROXY_* env var overrides after loading.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    let mut config: Config = serde_yaml::from_str(&contents)?;
    apply_env_overrides(&mut config);
    config.validate().map_err(ProxyError::Config)?;
    Ok(config)
}

/// Load configuration from a YAML string (useful for testing)
///
/// Also applies TAPPROXY_* env var overrides after loading.
pub fn load_config_from_str(yaml: &str) -> Result<Config> {
    let mut config: Config = serde_yaml::from_str(yaml)?;
    apply_env_overrides(&mut config);
    config.validate().map_err(ProxyError::Config)?;
    Ok(config)
}

/// Apply TAPPROXY_* environment variable overrides to a config.
///
/// Any set env var overrides the corresponding config value.
///
/// Supported env vars:
/// - `TAPPROXY_INTERFACE` - Override capture interface
/// - `TAPPROXY_SERVICE_ADDRESS` - Override service address
/// - `TAPPROXY_SERVICE_PORT` - Override service port
/// - `TAPPROXY_WORKERS` - Override worker count
/// - `TAPPROXY_IDLE_TIMEOUT_SECS` - Override session idle timeout
/// - `TAPPROXY_LOG_LEVEL` - Override log level
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("TAPPROXY_INTERFACE") {
        debug!("Overriding capture interface from TAPPROXY_INTERFACE");
        config.capture.interface = val;
    }
    if let Ok(val) = std::env::var("TAPPROXY_SERVICE_ADDRESS") {
        debug!("Overriding service address from TAPPROXY_SERVICE_ADDRESS");
        config.service.address = val;
    }
    if let Ok(val) = std::env::var("TAPPROXY_SERVICE_PORT") {
        if let Ok(port) = val.parse::<u16>() {
            debug!("Overriding service port from TAPPROXY_SERVICE_PORT");
            config.service.port = port;
        }
    }
    if let Ok(val) = std::env::var("TAPPROXY_WORKERS") {
        if let Ok(count) = val.parse::<usize>() {
            debug!("Overriding worker count from TAPPROXY_WORKERS");
            config.workers.count = count;
        }
    }
    if let Ok(val) = std::env::var("TAPPROXY_IDLE_TIMEOUT_SECS") {
        if let Ok(secs) = val.parse::<u64>() {
            debug!("Overriding idle timeout from TAPPROXY_IDLE_TIMEOUT_SECS");
            config.session.idle_timeout_secs = secs;
        }
    }
    if let Ok(val) = std::env::var("TAPPROXY_LOG_LEVEL") {
        debug!("Overriding log level from TAPPROXY_LOG_LEVEL");
        config.logging.level = val;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_minimal() {
        let yaml = r#"
service:
  address: "10.0.0.2"
  port: 443
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.service.address, "10.0.0.2");
        assert_eq!(config.service.port, 443);
        assert_eq!(config.capture.interface, "any"); // default
        assert_eq!(config.workers.count, 4); // default
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let err = load_config_from_str("service: [not a map").unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn test_load_config_missing_service() {
        let err = load_config_from_str("capture:\n  interface: eth0\n").unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn test_load_config_validation_runs() {
        let yaml = r#"
service:
  address: "10.0.0.2"
  port: 443

workers:
  count: 0
"#;
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("workers.count"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/tapproxy.yaml")).unwrap_err();
        assert!(matches!(err, ProxyError::Io(_)));
    }

    #[test]
    fn test_env_override_interface() {
        std::env::set_var("TAPPROXY_INTERFACE", "eth9");

        let yaml = r#"
service:
  address: "10.0.0.2"
  port: 443
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.capture.interface, "eth9");

        std::env::remove_var("TAPPROXY_INTERFACE");
    }

    #[test]
    fn test_env_override_service_port() {
        let yaml = r#"
service:
  address: "10.0.0.2"
  port: 443
"#;

        std::env::set_var("TAPPROXY_SERVICE_PORT", "8443");
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.service.port, 8443);

        // An unparsable value is ignored, keeping the config value
        std::env::set_var("TAPPROXY_SERVICE_PORT", "not-a-port");
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.service.port, 443);

        std::env::remove_var("TAPPROXY_SERVICE_PORT");
    }
}
