//! Bridge configuration.
//!
//! A single YAML document describes the whole bridge: player-side options,
//! broker endpoint, and the dashboard façade port. Defaults are applied
//! before parsing so a minimal file only needs the API key, broker and
//! topic base.

use std::path::Path;

use serde::Deserialize;

use crate::error::{BridgeError, BridgeResult};

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enable verbose (debug-level) logging.
    pub debug: bool,

    /// Player-side options.
    pub sonos: SonosConfig,

    /// Broker endpoint and topic base.
    pub mqtt: MqttSection,

    /// Dashboard façade.
    pub webserver: WebServerConfig,
}

/// Options controlling discovery, subscriptions and event shaping.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SonosConfig {
    /// Value of the `X-Api-Key` header sent on every player request. Required.
    pub apikey: String,

    /// Restrict the bridge to this household id. When absent, the first
    /// household observed during discovery is latched and others ignored.
    pub household: Option<String>,

    /// Event namespaces subscribed on every group coordinator.
    pub subscriptions: Vec<String>,

    /// Reshape large upstream payloads into compact dashboard-friendly
    /// objects. Forces `fanout`.
    pub simplify: bool,

    /// Republish group-scoped events once per member on per-player topics.
    pub fanout: bool,

    /// mDNS discovery window in seconds.
    pub scantime: u64,
}

impl Default for SonosConfig {
    fn default() -> Self {
        Self {
            apikey: String::new(),
            household: None,
            subscriptions: Vec::new(),
            simplify: false,
            fanout: false,
            scantime: 5,
        }
    }
}

/// The `mqtt:` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    /// Broker endpoint.
    pub broker: BrokerConfig,

    /// Base of the published topic tree. Required.
    pub topic: String,
}

/// Broker endpoint description.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// MQTT client id.
    pub client: String,
    pub tls: bool,
    /// Username/password authentication requires `tls: true`.
    pub username: String,
    pub password: String,
}

/// Dashboard façade options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebServerConfig {
    /// Port the HTTP/WebSocket façade binds to.
    pub port: u16,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self { port: 8000 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            sonos: SonosConfig::default(),
            mqtt: MqttSection::default(),
            webserver: WebServerConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration from a YAML file.
    ///
    /// `simplify: true` forces `fanout` on: simplified payloads are meant
    /// for per-player dashboard topics.
    pub fn load(path: &Path) -> BridgeResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::ConfigInvalid(format!("unable to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parses and validates a YAML configuration document.
    pub fn from_yaml(content: &str) -> BridgeResult<Self> {
        let mut config: Config = serde_yaml::from_str(content)
            .map_err(|e| BridgeError::ConfigInvalid(e.to_string()))?;

        config.validate()?;

        if config.sonos.simplify && !config.sonos.fanout {
            log::info!("[Config] simplify is set, forcing fanout");
            config.sonos.fanout = true;
        }

        Ok(config)
    }

    fn validate(&self) -> BridgeResult<()> {
        if self.sonos.apikey.is_empty() {
            return Err(BridgeError::ConfigInvalid(
                "sonos.apikey must be present".into(),
            ));
        }

        if self.mqtt.topic.is_empty() {
            return Err(BridgeError::ConfigInvalid(
                "mqtt.topic must be present".into(),
            ));
        }

        let broker = &self.mqtt.broker;
        if broker.host.is_empty() || broker.client.is_empty() || broker.port == 0 {
            return Err(BridgeError::ConfigInvalid(
                "mqtt.broker requires host, port and client".into(),
            ));
        }

        if broker.username.is_empty() != broker.password.is_empty() {
            return Err(BridgeError::ConfigInvalid(
                "mqtt.broker username and password must both be set or both cleared".into(),
            ));
        }

        if !broker.tls && !broker.username.is_empty() {
            return Err(BridgeError::ConfigInvalid(
                "mqtt.broker username/password auth requires tls".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
sonos:
  apikey: "key123"
mqtt:
  broker:
    host: "broker.local"
    port: 1883
    client: "roomcast"
  topic: "sonos"
"#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.sonos.scantime, 5);
        assert_eq!(config.webserver.port, 8000);
        assert!(!config.debug);
        assert!(config.sonos.household.is_none());
        assert!(config.sonos.subscriptions.is_empty());
    }

    #[test]
    fn missing_apikey_is_rejected() {
        let yaml = MINIMAL.replace("apikey: \"key123\"", "apikey: \"\"");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(BridgeError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn missing_topic_is_rejected() {
        let yaml = MINIMAL.replace("topic: \"sonos\"", "topic: \"\"");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(BridgeError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn incomplete_broker_is_rejected() {
        let yaml = MINIMAL.replace("port: 1883", "port: 0");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn credentials_without_tls_are_rejected() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.mqtt.broker.username = "u".into();
        config.mqtt.broker.password = "p".into();
        assert!(config.validate().is_err());

        config.mqtt.broker.tls = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn one_sided_credentials_are_rejected() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        config.mqtt.broker.tls = true;
        config.mqtt.broker.username = "u".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn simplify_forces_fanout() {
        let yaml = MINIMAL.replace("sonos:\n", "sonos:\n  simplify: true\n");
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(config.sonos.simplify);
        assert!(config.sonos.fanout);
    }
}
