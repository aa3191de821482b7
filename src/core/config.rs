use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::{Result, ShareError};

/// Suffix appended to the destination path of an unfinished download.
pub const STAGING_SUFFIX: &str = ".part";

/// URL prefix reserved for the bundled data directory.
pub const DATA_PREFIX: &str = "__data__";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port used for both the UDP responder and the HTTP server.
    pub port: u16,
    pub bind_ip: IpAddr,
    pub broadcast_ip: IpAddr,
    /// Shared hello token, also acts as a weak password.
    pub network_name: String,
    /// Enables datagram encryption when set.
    pub network_password: Option<String>,
    pub hostname: String,
    pub share_path: PathBuf,
    pub incoming_path: PathBuf,
    pub data_path: PathBuf,
    pub static_hosts: Vec<String>,
    pub resolve_hosts: bool,
    /// Do not answer discovery or search requests.
    pub invisible: bool,
    pub disable_webinterface: bool,
    pub hidden_files: Vec<String>,
    pub folder_images: Vec<String>,
    pub max_image_size: u64,
    pub max_search_results: usize,
    pub search_timeout_ms: u64,
    pub discover_timeout_ms: u64,
    pub index_interval_secs: u64,
    pub cache_timeout_secs: u64,
    pub download_block_size: usize,
    pub download_retry_delay_ms: u64,
    pub download_retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 31337,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_ip: IpAddr::V4(Ipv4Addr::BROADCAST),
            network_name: "HELO".to_string(),
            network_password: None,
            hostname: default_hostname(),
            share_path: PathBuf::from("./shared"),
            incoming_path: PathBuf::from("./incoming"),
            data_path: PathBuf::from("./data"),
            static_hosts: Vec::new(),
            resolve_hosts: false,
            invisible: false,
            disable_webinterface: false,
            hidden_files: vec![r"\..*".to_string(), r"Thumbs\.db".to_string()],
            folder_images: vec![
                r"\.?folder\.(png|jpg|gif|img)$".to_string(),
                r"cover\.(png|jpg|gif)$".to_string(),
                r"cover\-front\.(png|jpg|gif)$".to_string(),
                r"cover.*?\.(png|jpg|gif)$".to_string(),
                r"albumart.*?large\.jpg$".to_string(),
                r"albumart.*?\.jpg".to_string(),
            ],
            max_image_size: 250_000,
            max_search_results: 128,
            search_timeout_ms: 5_000,
            discover_timeout_ms: 5_000,
            index_interval_secs: 3_600,
            cache_timeout_secs: 600,
            download_block_size: 65_536,
            download_retry_delay_ms: 10_000,
            download_retries: 3,
        }
    }
}

impl Config {
    /// Reject values the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.network_name.is_empty() || self.network_name.contains(' ') {
            return Err(ShareError::ConfigError(format!(
                "network name must be a single non-empty word, got {:?}",
                self.network_name
            )));
        }
        if self.max_search_results == 0 {
            return Err(ShareError::ConfigError(
                "max_search_results must be positive".to_string(),
            ));
        }
        if self.download_block_size == 0 {
            return Err(ShareError::ConfigError(
                "download_block_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    pub fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_ip, self.port)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn discover_timeout(&self) -> Duration {
        Duration::from_millis(self.discover_timeout_ms)
    }

    pub fn index_interval(&self) -> Duration {
        Duration::from_secs(self.index_interval_secs)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_secs)
    }

    pub fn download_retry_delay(&self) -> Duration {
        Duration::from_millis(self.download_retry_delay_ms)
    }

    /// Icons live under `<data_path>/icons/32x32`.
    pub fn icon_path(&self) -> PathBuf {
        self.data_path.join("icons").join("32x32")
    }
}

fn default_hostname() -> String {
    dns_lookup::get_hostname().unwrap_or_else(|_| "lan-share".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broadcast_addr().to_string(), "255.255.255.255:31337");
        assert_eq!(config.search_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_hostname_is_the_system_name() {
        if let Ok(system) = dns_lookup::get_hostname() {
            assert_eq!(Config::default().hostname, system);
        }
        assert!(!Config::default().hostname.is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"port": 4000, "network_name": "LAN"}"#).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.network_name, "LAN");
        assert_eq!(config.max_search_results, 128);
        assert_eq!(config.hidden_files.len(), 2);
    }

    #[test]
    fn test_rejects_network_name_with_space() {
        let config = Config {
            network_name: "two words".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ShareError::ConfigError(_))));
    }
}
