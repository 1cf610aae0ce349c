//! Bridge settings.

use serde::{Deserialize, Serialize};

use crate::{BridgeError, Result};

/// Connection and display settings shared by every generation
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BridgeSettings {
    /// Engine host name
    #[serde(default = "default_server")]
    pub server: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// Decode and report latent previews while sampling
    #[serde(default = "default_true")]
    pub show_preview: bool,

    /// Longest side of a reported preview, in pixels
    #[serde(default = "default_max_preview_resolution")]
    pub max_preview_resolution: u32,

    /// `tracing` filter directive used by the demos
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    7859
}

fn default_true() -> bool {
    true
}

fn default_max_preview_resolution() -> u32 {
    512
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            server: default_server(),
            port: default_port(),
            use_tls: true,
            show_preview: true,
            max_preview_resolution: default_max_preview_resolution(),
            log_level: default_log_level(),
        }
    }
}

impl BridgeSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: BridgeSettings =
            serde_json::from_str(json).map_err(|e| BridgeError::Settings(e.to_string()))?;
        if settings.server.trim().is_empty() {
            return Err(BridgeError::Settings("server must not be empty".into()));
        }
        Ok(settings)
    }

    /// `host:port` of the engine
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let settings = BridgeSettings::from_json_str("{}").unwrap();
        assert_eq!(settings, BridgeSettings::default());
        assert_eq!(settings.endpoint(), "localhost:7859");
        assert!(settings.use_tls);
        assert_eq!(settings.max_preview_resolution, 512);
    }

    #[test]
    fn test_partial_override() {
        let settings =
            BridgeSettings::from_json_str(r#"{"server": "studio.local", "port": 7860, "show_preview": false}"#)
                .unwrap();
        assert_eq!(settings.endpoint(), "studio.local:7860");
        assert!(!settings.show_preview);
        assert_eq!(settings.max_preview_resolution, 512);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(BridgeSettings::from_json_str(r#"{"port": "seven"}"#).is_err());
        assert!(BridgeSettings::from_json_str(r#"{"server": " "}"#).is_err());
        assert!(BridgeSettings::from_json_str("not json").is_err());
    }
}
