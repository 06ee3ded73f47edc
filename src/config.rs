//! Configuration module for the skynet agent.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Zabbix server host, used for both the trapper socket and the API.
    pub zabbix_host: String,
    /// Zabbix trapper port (default: 10051)
    pub zabbix_port: u16,
    /// JSON-RPC endpoint; derived from `zabbix_host` when unset.
    pub zabbix_api_url: Option<String>,
    pub zabbix_user: String,
    pub zabbix_user_pwd: String,
    /// Host label attached to every item sent to Zabbix.
    pub publish_host: String,
    /// Zabbix host groups the host-level producers look at.
    pub hostgroups: Vec<String>,
    /// Size of top-N rankings (default: 5)
    pub top: usize,
    /// Period mapping file, a path or a bare name searched in the mapping dirs.
    pub mapping_file: String,
    /// Pipeline file name searched in the pipeline dirs.
    pub pipeline_file: String,
    /// Statistics store location, `sqlite://path` or a plain path.
    pub store_url: String,
    /// Attempts for store connection setup (default: 3)
    pub max_retries: u32,
    /// Delay between store connection attempts (default: 2s)
    pub retry_interval: Duration,
    /// Upper bound on one trapper round trip (default: 30s)
    pub send_timeout: Duration,
    /// Check the API session at the start of every tick.
    pub revalidate_session: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            zabbix_host: "127.0.0.1".to_string(),
            zabbix_port: 10051,
            zabbix_api_url: None,
            zabbix_user: "Admin".to_string(),
            zabbix_user_pwd: String::new(),
            publish_host: "openstack".to_string(),
            hostgroups: vec!["Controller".to_string(), "Computer".to_string()],
            top: 5,
            mapping_file: "mapping.json".to_string(),
            pipeline_file: "skynet_pipeline.yaml".to_string(),
            store_url: "sqlite://skynet.db".to_string(),
            max_retries: 3,
            retry_interval: Duration::from_secs(2),
            send_timeout: Duration::from_secs(30),
            revalidate_session: true,
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SKYNET_ZABBIX_HOST`, `SKYNET_ZABBIX_PORT`, `SKYNET_ZABBIX_API_URL`
    /// - `SKYNET_ZABBIX_USER`, `SKYNET_ZABBIX_USER_PWD`
    /// - `SKYNET_PUBLISH_HOST`, `SKYNET_HOSTGROUPS` (comma separated)
    /// - `SKYNET_TOP`, `SKYNET_MAPPING_FILE`, `SKYNET_PIPELINE_FILE`
    /// - `SKYNET_STORE_URL`, `SKYNET_MAX_RETRIES`, `SKYNET_RETRY_INTERVAL` (seconds)
    /// - `SKYNET_SEND_TIMEOUT` (seconds), `SKYNET_REVALIDATE_SESSION` (true/false)
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(host) = lookup("SKYNET_ZABBIX_HOST") {
            cfg.zabbix_host = host;
        }
        if let Some(port) = lookup("SKYNET_ZABBIX_PORT") {
            cfg.zabbix_port = parse_var("SKYNET_ZABBIX_PORT", &port)?;
        }
        if let Some(url) = lookup("SKYNET_ZABBIX_API_URL") {
            cfg.zabbix_api_url = Some(url);
        }
        if let Some(user) = lookup("SKYNET_ZABBIX_USER") {
            cfg.zabbix_user = user;
        }
        if let Some(pwd) = lookup("SKYNET_ZABBIX_USER_PWD") {
            cfg.zabbix_user_pwd = pwd;
        }
        if let Some(host) = lookup("SKYNET_PUBLISH_HOST") {
            cfg.publish_host = host;
        }
        if let Some(groups) = lookup("SKYNET_HOSTGROUPS") {
            cfg.hostgroups = groups
                .split(',')
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect();
        }
        if let Some(top) = lookup("SKYNET_TOP") {
            cfg.top = parse_var("SKYNET_TOP", &top)?;
        }
        if let Some(file) = lookup("SKYNET_MAPPING_FILE") {
            cfg.mapping_file = file;
        }
        if let Some(file) = lookup("SKYNET_PIPELINE_FILE") {
            cfg.pipeline_file = file;
        }
        if let Some(url) = lookup("SKYNET_STORE_URL") {
            cfg.store_url = url;
        }
        if let Some(retries) = lookup("SKYNET_MAX_RETRIES") {
            cfg.max_retries = parse_var("SKYNET_MAX_RETRIES", &retries)?;
        }
        if let Some(secs) = lookup("SKYNET_RETRY_INTERVAL") {
            cfg.retry_interval = Duration::from_secs(parse_var("SKYNET_RETRY_INTERVAL", &secs)?);
        }
        if let Some(secs) = lookup("SKYNET_SEND_TIMEOUT") {
            cfg.send_timeout = Duration::from_secs(parse_var("SKYNET_SEND_TIMEOUT", &secs)?);
        }
        if let Some(flag) = lookup("SKYNET_REVALIDATE_SESSION") {
            cfg.revalidate_session = parse_var("SKYNET_REVALIDATE_SESSION", &flag)?;
        }

        Ok(cfg)
    }

    /// JSON-RPC endpoint of the Zabbix frontend.
    pub fn api_url(&self) -> String {
        match &self.zabbix_api_url {
            Some(url) => url.clone(),
            None => format!("http://{}/zabbix/api_jsonrpc.php", self.zabbix_host),
        }
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.zabbix_port, 10051);
        assert_eq!(cfg.top, 5);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.mapping_file, "mapping.json");
        assert_eq!(cfg.api_url(), "http://127.0.0.1/zabbix/api_jsonrpc.php");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SKYNET_ZABBIX_HOST", "zbx.local"),
            ("SKYNET_ZABBIX_PORT", "10052"),
            ("SKYNET_HOSTGROUPS", "Controller, Storage ,"),
            ("SKYNET_RETRY_INTERVAL", "7"),
            ("SKYNET_REVALIDATE_SESSION", "false"),
        ]
        .into_iter()
        .collect();

        let cfg = AgentConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.zabbix_host, "zbx.local");
        assert_eq!(cfg.zabbix_port, 10052);
        assert_eq!(cfg.hostgroups, vec!["Controller", "Storage"]);
        assert_eq!(cfg.retry_interval, Duration::from_secs(7));
        assert!(!cfg.revalidate_session);
        assert_eq!(cfg.api_url(), "http://zbx.local/zabbix/api_jsonrpc.php");
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = AgentConfig::from_lookup(|k| {
            (k == "SKYNET_TOP").then(|| "five".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("SKYNET_TOP"));
    }
}
