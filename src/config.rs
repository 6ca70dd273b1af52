//! Configuration loading
//!
//! The proxy reads two JSON files: `proxy.json` (listen endpoint and
//! optional IP-to-label mappings) and an optional `appsettings.json`
//! carrying logging sink settings only.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

/// Proxy configuration (`proxy.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// IPv4 or IPv6 literal the listener binds to
    #[serde(rename = "ListenIPAddress")]
    pub listen_ip_address: String,

    /// TCP port the listener binds to (1..=65535)
    #[serde(rename = "ListenPort")]
    pub listen_port: u16,

    /// Optional IP-to-friendly-name mappings used for log decoration
    #[serde(rename = "IPAddressMappings", default)]
    pub ip_address_mappings: Vec<IpMapping>,
}

/// One IP-to-label mapping entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpMapping {
    /// IP literal to decorate
    #[serde(rename = "IPAddress")]
    pub ip_address: String,

    /// Label appended to logged endpoints as ` (Label)`
    #[serde(rename = "FriendlyName")]
    pub friendly_name: String,
}

impl ProxyConfig {
    /// Validate the listen fields and build the bind address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        if self.listen_ip_address.trim().is_empty() {
            bail!("ListenIPAddress must not be empty");
        }
        let ip: IpAddr = self
            .listen_ip_address
            .parse()
            .with_context(|| format!("Invalid ListenIPAddress: {:?}", self.listen_ip_address))?;
        if self.listen_port == 0 {
            bail!("ListenPort must be in 1..=65535");
        }
        Ok(SocketAddr::new(ip, self.listen_port))
    }
}

/// Load the proxy configuration from a JSON file
///
/// A missing file is an error naming the full resolved path, so a user
/// started in the wrong directory can see where the file was expected.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ProxyConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).with_context(|| {
        let resolved = std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf());
        format!("Failed to read config file: {}", resolved.display())
    })?;

    parse_config(&content)
}

/// Parse the proxy configuration from a JSON string
pub fn parse_config(content: &str) -> Result<ProxyConfig> {
    serde_json::from_str(content).with_context(|| "Failed to parse configuration")
}

/// Logging sink settings (`appsettings.json`)
///
/// Opaque to the proxy core; only the entry point reads it to configure
/// the subscriber. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Minimum level: trace, debug, info, warn or error
    #[serde(rename = "MinimumLevel", default = "default_minimum_level")]
    pub minimum_level: String,

    /// Emit JSON-formatted log lines instead of plain text
    #[serde(rename = "JsonFormat", default)]
    pub json_format: bool,
}

fn default_minimum_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            minimum_level: default_minimum_level(),
            json_format: false,
        }
    }
}

/// Load logging settings; an absent file yields the defaults
pub fn load_logging_settings<P: AsRef<Path>>(path: P) -> Result<LoggingSettings> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse logging settings: {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(LoggingSettings::default()),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to read logging settings: {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config_str = r#"
{
    "ListenIPAddress": "127.0.0.1",
    "ListenPort": 1080
}
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.listen_ip_address, "127.0.0.1");
        assert_eq!(config.listen_port, 1080);
        assert!(config.ip_address_mappings.is_empty());

        let addr = config.listen_addr().unwrap();
        assert_eq!(addr, "127.0.0.1:1080".parse().unwrap());
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
{
    "ListenIPAddress": "::1",
    "ListenPort": 8388,
    "IPAddressMappings": [
        { "IPAddress": "192.168.1.10", "FriendlyName": "Office NAS" },
        { "IPAddress": "10.0.0.1", "FriendlyName": "Gateway" }
    ]
}
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.listen_port, 8388);
        assert_eq!(config.ip_address_mappings.len(), 2);
        assert_eq!(config.ip_address_mappings[0].friendly_name, "Office NAS");

        let addr = config.listen_addr().unwrap();
        assert!(addr.is_ipv6());
    }

    #[test]
    fn test_parse_config_unknown_fields_ignored() {
        let config_str = r#"
{
    "ListenIPAddress": "0.0.0.0",
    "ListenPort": 1080,
    "SomethingElse": { "Nested": true }
}
"#;

        let config = parse_config(config_str).unwrap();
        assert_eq!(config.listen_port, 1080);
    }

    #[test]
    fn test_parse_config_missing_listen_address() {
        let result = parse_config(r#"{ "ListenPort": 1080 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_config_port_out_of_range() {
        let result = parse_config(r#"{ "ListenIPAddress": "127.0.0.1", "ListenPort": 70000 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_listen_addr_rejects_empty_address() {
        let config = ProxyConfig {
            listen_ip_address: "  ".to_string(),
            listen_port: 1080,
            ip_address_mappings: Vec::new(),
        };
        assert!(config.listen_addr().is_err());
    }

    #[test]
    fn test_listen_addr_rejects_bad_literal() {
        let config = ProxyConfig {
            listen_ip_address: "proxy.example.org".to_string(),
            listen_port: 1080,
            ip_address_mappings: Vec::new(),
        };
        assert!(config.listen_addr().is_err());
    }

    #[test]
    fn test_listen_addr_rejects_port_zero() {
        let config = ProxyConfig {
            listen_ip_address: "127.0.0.1".to_string(),
            listen_port: 0,
            ip_address_mappings: Vec::new(),
        };
        assert!(config.listen_addr().is_err());
    }

    #[test]
    fn test_load_config_missing_file_names_full_path() {
        let err = load_config("definitely-missing-proxy.json").unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("definitely-missing-proxy.json"));
        // The resolved path is absolute
        assert!(message.contains('/') || message.contains('\\'));
    }

    #[test]
    fn test_logging_settings_defaults() {
        let settings = LoggingSettings::default();
        assert_eq!(settings.minimum_level, "info");
        assert!(!settings.json_format);
    }

    #[test]
    fn test_logging_settings_parse() {
        let settings: LoggingSettings =
            serde_json::from_str(r#"{ "MinimumLevel": "debug", "JsonFormat": true }"#).unwrap();
        assert_eq!(settings.minimum_level, "debug");
        assert!(settings.json_format);
    }

    #[test]
    fn test_load_logging_settings_absent_file() {
        let settings = load_logging_settings("definitely-missing-appsettings.json").unwrap();
        assert_eq!(settings.minimum_level, "info");
    }
}
