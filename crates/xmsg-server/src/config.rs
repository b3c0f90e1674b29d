// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Server configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use xmsg::config::{
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MULTICAST_ADDR, DEFAULT_NAME_SERVER_TCP_PORT,
    DEFAULT_NAME_SERVER_UDP_PORT, DEFAULT_PROXY_PORT, DEFAULT_REGISTRAR_PORT, MAX_PASSWORD_LEN,
    PROXY_CONTROL_OFFSET,
};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address every service binds to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Proxy publish port; subscribe and control ports follow it
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,

    /// Registrar port
    #[serde(default = "default_registrar_port")]
    pub registrar_port: u16,

    /// Front-end registrar host to mirror local registrations to
    #[serde(default)]
    pub frontend_host: Option<String>,

    /// Front-end registrar port
    #[serde(default = "default_registrar_port")]
    pub frontend_port: u16,

    /// Front-end synchronisation interval (seconds)
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Run the name server
    #[serde(default = "default_true")]
    pub name_server: bool,

    /// Name-server TCP port
    #[serde(default = "default_ns_tcp_port")]
    pub ns_tcp_port: u16,

    /// Name-server UDP port (multicast discovery)
    #[serde(default = "default_ns_udp_port")]
    pub ns_udp_port: u16,

    /// Answer multicast discovery requests
    #[serde(default = "default_true")]
    pub multicast: bool,

    /// Multicast group to join
    #[serde(default = "default_multicast_addr")]
    pub multicast_addr: Ipv4Addr,

    /// Password clients must present
    #[serde(default)]
    pub password: Option<String>,

    /// Port advertised by the name server (default: the proxy port)
    #[serde(default)]
    pub domain_port: Option<u16>,

    /// Maximum frame size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_proxy_port() -> u16 {
    DEFAULT_PROXY_PORT
}

fn default_registrar_port() -> u16 {
    DEFAULT_REGISTRAR_PORT
}

fn default_sync_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_ns_tcp_port() -> u16 {
    DEFAULT_NAME_SERVER_TCP_PORT
}

fn default_ns_udp_port() -> u16 {
    DEFAULT_NAME_SERVER_UDP_PORT
}

fn default_multicast_addr() -> Ipv4Addr {
    DEFAULT_MULTICAST_ADDR
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            proxy_port: default_proxy_port(),
            registrar_port: default_registrar_port(),
            frontend_host: None,
            frontend_port: default_registrar_port(),
            sync_interval_secs: default_sync_interval(),
            name_server: true,
            ns_tcp_port: default_ns_tcp_port(),
            ns_udp_port: default_ns_udp_port(),
            multicast: true,
            multicast_addr: default_multicast_addr(),
            password: None,
            domain_port: None,
            max_message_size: default_max_message_size(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Front-end synchronisation interval as Duration.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Port the name server hands out to clients.
    pub fn advertised_port(&self) -> u16 {
        self.domain_port.unwrap_or(self.proxy_port)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy_port == 0 || self.registrar_port == 0 {
            return Err(ConfigError::InvalidValue("ports cannot be 0".into()));
        }
        if self.proxy_port > u16::MAX - PROXY_CONTROL_OFFSET {
            return Err(ConfigError::InvalidValue(format!(
                "proxy_port {} leaves no room for the subscribe and control ports",
                self.proxy_port
            )));
        }
        if (self.proxy_port..=self.proxy_port + PROXY_CONTROL_OFFSET).contains(&self.registrar_port) {
            return Err(ConfigError::InvalidValue(format!(
                "registrar_port {} collides with the proxy ports",
                self.registrar_port
            )));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max_message_size cannot be 0".into(),
            ));
        }
        if let Some(host) = &self.frontend_host {
            if host.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "frontend_host cannot be empty".into(),
                ));
            }
            if self.sync_interval_secs == 0 {
                return Err(ConfigError::InvalidValue(
                    "sync_interval_secs cannot be 0".into(),
                ));
            }
        }
        if self.name_server {
            if self.ns_tcp_port == 0 {
                return Err(ConfigError::InvalidValue("ns_tcp_port cannot be 0".into()));
            }
            if self.advertised_port() == 0 {
                return Err(ConfigError::InvalidValue("domain_port cannot be 0".into()));
            }
        }
        if let Some(password) = &self.password {
            if password.len() > MAX_PASSWORD_LEN {
                return Err(ConfigError::InvalidValue(format!(
                    "password longer than {} bytes",
                    MAX_PASSWORD_LEN
                )));
            }
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.proxy_port, 7771);
        assert_eq!(config.registrar_port, 8888);
        assert_eq!(config.advertised_port(), 7771);
        assert!(config.name_server);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"proxy_port": 9000, "password": "pw"}"#).unwrap();
        assert_eq!(config.proxy_port, 9000);
        assert_eq!(config.registrar_port, 8888);
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert!(config.multicast);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        let config = ServerConfig {
            frontend_host: Some("frontend.local".into()),
            domain_port: Some(9100),
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.frontend_host.as_deref(), Some("frontend.local"));
        assert_eq!(loaded.advertised_port(), 9100);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"{ not json").unwrap();
        let err = ServerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_registrar_on_proxy_ports() {
        let config = ServerConfig {
            registrar_port: 7773,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_empty_frontend() {
        let config = ServerConfig {
            frontend_host: Some("  ".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_proxy_port_overflow() {
        let config = ServerConfig {
            proxy_port: u16::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
