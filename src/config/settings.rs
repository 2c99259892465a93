// Configuration structs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use super::constants::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Update server (message store, HTTP API, discovery responder)
    pub server: ServerConfig,

    /// Polling / discovery client
    pub client: ClientConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host for both HTTP and UDP listeners (e.g. "0.0.0.0")
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// UDP discovery port
    pub udp_port: u16,
    /// Root of the persisted state (messages.json, versions/, ...)
    pub storage_dir: PathBuf,
    /// Answer UDP discovery packets
    pub discovery_enabled: bool,
}

/// Client configuration for polling a server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the update server
    pub server_url: String,
    /// Fixed polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Where the received-message history is persisted
    pub history_path: PathBuf,
    /// UDP port discovery packets are sent to
    pub udp_port: u16,
    /// Broadcast address for discovery (usually the subnet broadcast)
    pub discovery_target: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            storage_dir: herald_home().join("updates"),
            discovery_enabled: true,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            history_path: herald_home().join(HISTORY_FILE),
            udp_port: DEFAULT_UDP_PORT,
            discovery_target: DEFAULT_DISCOVERY_TARGET.to_string(),
        }
    }
}

/// `~/.herald`, or the working directory when no home is available.
pub(crate) fn herald_home() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(HERALD_DIR))
        .unwrap_or_else(|| PathBuf::from(HERALD_DIR))
}

impl ServerConfig {
    pub fn http_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.port)
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.udp_port)
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn discovery_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.discovery_target, self.udp_port)
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = if host == "localhost" {
        IpAddr::from([127, 0, 0, 1])
    } else {
        host.parse()
            .with_context(|| format!("Invalid IP address: '{}'", host))?
    };
    Ok(SocketAddr::new(ip, port))
}

impl Config {
    /// Validate configuration and return helpful errors
    pub fn validate(&self) -> Result<()> {
        self.server
            .http_addr()
            .context("server.host must be an IP address (e.g. 0.0.0.0)")?;
        self.client
            .discovery_addr()
            .context("client.discovery_target must be an IP address (e.g. 192.168.1.255)")?;

        if self.client.poll_interval_ms < 100 {
            bail!(
                "poll_interval_ms ({}) is too low; use at least 100ms",
                self.client.poll_interval_ms
            );
        }

        if self.client.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be greater than 0");
        }

        if !(self.client.server_url.starts_with("http://")
            || self.client.server_url.starts_with("https://"))
        {
            bail!(
                "Invalid server_url: '{}'\nExpected something like http://192.168.1.10:8080",
                self.client.server_url
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.udp_port, 12345);
        assert_eq!(config.client.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_localhost_resolves_to_loopback() {
        let server = ServerConfig {
            host: "localhost".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(server.http_addr().unwrap(), "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn test_rejects_bad_host() {
        let mut config = Config::default();
        config.server.host = "not-an-ip".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_poll_interval() {
        let mut config = Config::default();
        config.client.poll_interval_ms = 10;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("poll_interval_ms"));
    }

    #[test]
    fn test_rejects_non_http_url() {
        let mut config = Config::default();
        config.client.server_url = "ftp://10.0.0.1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9090

            [client]
            poll_interval_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.udp_port, DEFAULT_UDP_PORT);
        assert_eq!(config.client.poll_interval_ms, 2500);
        assert_eq!(config.client.server_url, DEFAULT_SERVER_URL);
    }
}
