//! Server configuration, read once at startup from `MatchServerConfig.json`.
//! A missing file is fine; every field has a default.

use serde::Deserialize;

pub const CONFIG_PATH: &str = "MatchServerConfig.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the sensor RPC link listens on.
    pub tcp_port: u16,
    /// Port the HTTP control surface listens on.
    pub http_port: u16,
    /// Word list for challenge resolution, one word per line.
    pub dictionary_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            tcp_port: protocol::DEFAULT_TCP_PORT,
            http_port: protocol::DEFAULT_HTTP_PORT,
            dictionary_path: "CSW21.txt".into(),
        }
    }
}

/// Loads the configuration file, falling back to defaults if it is absent
/// or unparsable.
pub async fn load_config() -> ServerConfig {
    let content = match tokio::fs::read_to_string(CONFIG_PATH).await {
        Ok(content) => content,
        Err(error) => {
            tracing::info!(%error, path = CONFIG_PATH, "No config file, using defaults");
            return ServerConfig::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(error) => {
            tracing::warn!(%error, path = CONFIG_PATH, "Failed to parse config, using defaults");
            ServerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"tcp_port": 4000}"#).unwrap();
        assert_eq!(config.tcp_port, 4000);
        assert_eq!(config.http_port, protocol::DEFAULT_HTTP_PORT);
        assert_eq!(config.dictionary_path, "CSW21.txt");
    }
}
