// Node configuration
//
// Read from the environment once at startup. A `.env` file in the working
// directory is loaded first by `main`.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 3001;
pub const DEFAULT_P2P_HOST: &str = "0.0.0.0";
pub const DEFAULT_P2P_PORT: u16 = 6001;
pub const DEFAULT_DATA_DIR: &str = "./blockchain-data";
pub const DEFAULT_AUTO_SAVE_SECS: u64 = 30;

/// Settings of a running node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub http_host: String,
    pub http_port: u16,
    pub p2p_host: String,
    pub p2p_port: u16,

    /// Peer URLs dialed at startup, e.g. `ws://10.0.0.2:6001`
    pub peers: Vec<String>,

    pub data_dir: String,

    /// Interval between periodic saves, 0 disables them
    pub auto_save_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            p2p_host: DEFAULT_P2P_HOST.to_string(),
            p2p_port: DEFAULT_P2P_PORT,
            peers: Vec::new(),
            data_dir: DEFAULT_DATA_DIR.to_string(),
            auto_save_secs: DEFAULT_AUTO_SAVE_SECS,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`
    ///
    /// Unset variables take their default; unparsable ones are logged and
    /// take their default too.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        Config {
            http_host: lookup("HTTP_HOST").unwrap_or(defaults.http_host),
            http_port: parse_or(&lookup, "HTTP_PORT", defaults.http_port),
            p2p_host: lookup("P2P_HOST").unwrap_or(defaults.p2p_host),
            p2p_port: parse_or(&lookup, "P2P_PORT", defaults.p2p_port),
            peers: lookup("PEERS").map(|v| parse_peers(&v)).unwrap_or_default(),
            data_dir: lookup("DATA_DIR").unwrap_or(defaults.data_dir),
            auto_save_secs: parse_or(&lookup, "AUTO_SAVE_SECS", defaults.auto_save_secs),
        }
    }

    /// Address the peer listener binds to
    pub fn p2p_address(&self) -> String {
        format!("{}:{}", self.p2p_host, self.p2p_port)
    }

    pub fn auto_save_interval(&self) -> Option<Duration> {
        match self.auto_save_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}

fn parse_peers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|peer| !peer.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);

        assert_eq!(config, Config::default());
        assert_eq!(config.http_port, 3001);
        assert_eq!(config.p2p_address(), "0.0.0.0:6001");
        assert_eq!(config.auto_save_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("HTTP_PORT", "3002"),
            ("P2P_HOST", "127.0.0.1"),
            ("P2P_PORT", "6002"),
            ("PEERS", " ws://localhost:6001, ,ws://10.0.0.2:6001 "),
            ("DATA_DIR", "/tmp/node-b"),
            ("AUTO_SAVE_SECS", "0"),
        ]);

        assert_eq!(config.http_port, 3002);
        assert_eq!(config.p2p_address(), "127.0.0.1:6002");
        assert_eq!(
            config.peers,
            vec!["ws://localhost:6001".to_string(), "ws://10.0.0.2:6001".to_string()]
        );
        assert_eq!(config.data_dir, "/tmp/node-b");
        assert_eq!(config.auto_save_interval(), None);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[("HTTP_PORT", "http"), ("AUTO_SAVE_SECS", "-5")]);

        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.auto_save_secs, DEFAULT_AUTO_SAVE_SECS);
    }
}
