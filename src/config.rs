use anyhow::Result;
use serde::Deserialize;

use crate::disruptors::InjectTimeout;
use crate::k8s::DEFAULT_AGENT_IMAGE;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Namespace used when a request does not name one
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_agent_image")]
    pub agent_image: String,

    /// Seconds to wait for the agent to be running: 0 uses the default
    /// wait, a negative value does not wait
    #[serde(default)]
    pub inject_timeout_secs: i64,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_port() -> u16 {
    8080
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_agent_image() -> String {
    DEFAULT_AGENT_IMAGE.to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        let settings: Config = config
            .try_deserialize()
            .unwrap_or_else(|_| Config::default());

        Ok(settings)
    }

    pub fn inject_timeout(&self) -> InjectTimeout {
        InjectTimeout::from_secs(self.inject_timeout_secs)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            namespace: default_namespace(),
            agent_image: default_agent_image(),
            inject_timeout_secs: 0,
            log_format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.namespace, "default");
        assert_eq!(config.agent_image, DEFAULT_AGENT_IMAGE);
        assert_eq!(config.inject_timeout(), InjectTimeout::UseDefault);
        assert!(!config.json_logs());
    }

    #[test]
    fn test_inject_timeout_from_config() {
        let config = Config {
            inject_timeout_secs: -1,
            ..Default::default()
        };
        assert_eq!(config.inject_timeout(), InjectTimeout::NoWait);

        let config = Config {
            inject_timeout_secs: 10,
            log_format: "JSON".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.inject_timeout(),
            InjectTimeout::WaitUpTo(Duration::from_secs(10))
        );
        assert!(config.json_logs());
    }
}
