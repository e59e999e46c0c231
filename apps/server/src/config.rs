//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use embercast_core::{Config, LimitsConfig, MountConfig, TimeoutConfig, YpConfig};

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    /// Override: `EMBERCAST_BIND_ADDRESS`
    pub bind_address: IpAddr,

    /// Port to bind the HTTP server to.
    /// Override: `EMBERCAST_BIND_PORT`
    pub bind_port: u16,

    /// Server-wide source password.
    /// Override: `EMBERCAST_SOURCE_PASSWORD`
    pub source_password: String,

    /// Admin endpoint password. Admin surface is disabled when unset.
    /// Override: `EMBERCAST_ADMIN_PASSWORD`
    pub admin_password: Option<String>,

    /// Connection and buffer limits.
    pub limits: LimitsConfig,

    /// Source/listener timeouts.
    pub timeouts: TimeoutConfig,

    /// Pre-declared mounts keyed by path.
    pub mounts: std::collections::HashMap<String, MountConfig>,

    /// Directory announcement settings.
    pub yp: YpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = Config::default();
        Self {
            bind_address: "0.0.0.0".parse().expect("valid address"),
            bind_port: 8000,
            source_password: core.source_password,
            admin_password: None,
            limits: core.limits,
            timeouts: core.timeouts,
            mounts: core.mounts,
            yp: core.yp,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("EMBERCAST_BIND_ADDRESS") {
            if let Ok(addr) = val.parse() {
                self.bind_address = addr;
            }
        }

        if let Ok(val) = std::env::var("EMBERCAST_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("EMBERCAST_SOURCE_PASSWORD") {
            if !val.is_empty() {
                self.source_password = val;
            }
        }

        if let Ok(val) = std::env::var("EMBERCAST_ADMIN_PASSWORD") {
            if !val.is_empty() {
                self.admin_password = Some(val);
            }
        }
    }

    /// Converts to embercast-core's Config type.
    pub fn to_core_config(&self) -> Config {
        Config {
            source_password: self.source_password.clone(),
            admin_password: self.admin_password.clone(),
            limits: self.limits.clone(),
            timeouts: self.timeouts.clone(),
            mounts: self.mounts.clone(),
            yp: self.yp.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_a_valid_core_config() {
        let config = ServerConfig::default();
        assert!(config.to_core_config().validate().is_ok());
        assert_eq!(config.bind_port, 8000);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind_port: 9100\n\
             source_password: topsecret\n\
             mounts:\n\
             \x20 /live:\n\
             \x20   max_listeners: 10\n\
             \x20   name: Main\n"
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.bind_port, 9100);
        assert_eq!(config.source_password, "topsecret");
        let mount = &config.mounts["/live"];
        assert_eq!(mount.max_listeners, Some(10));
        assert_eq!(mount.name.as_deref(), Some("Main"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ServerConfig::load(Some(Path::new("/nonexistent/embercast.yaml"))).is_err());
    }
}
