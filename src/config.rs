// Service configuration loading (config/service.toml).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::auction::session::DEFAULT_FREE_TEAM_LIMIT;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the WebSocket hub binds to.
    pub bind: String,
    pub ws_port: u16,
    /// SQLite store path.
    pub db_path: String,
    /// Filesystem blob root for uploaded images.
    pub blob_root: String,
    /// Teams an owner may add without a subscription.
    pub free_team_limit: usize,
}

// ---------------------------------------------------------------------------
// service.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ServiceFile {
    websocket: WebsocketSection,
    database: DatabaseSection,
    blobs: BlobsSection,
    limits: LimitsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct WebsocketSection {
    bind: String,
    port: u16,
}

impl Default for WebsocketSection {
    fn default() -> Self {
        WebsocketSection {
            bind: "127.0.0.1".to_string(),
            port: 9480,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DatabaseSection {
    /// Defaults to the platform data directory when omitted.
    path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct BlobsSection {
    /// Defaults to the platform data directory when omitted.
    root: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct LimitsSection {
    free_team_limit: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        LimitsSection {
            free_team_limit: DEFAULT_FREE_TEAM_LIMIT,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load configuration from `config/service.toml` under the current
/// directory. A missing file yields the defaults; a malformed one is an
/// error.
pub fn load_config() -> Result<Config, ConfigError> {
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    load_config_from(&base_dir)
}

pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("service.toml");
    let file: ServiceFile = if path.exists() {
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })?
    } else {
        ServiceFile::default()
    };

    let config = Config {
        bind: file.websocket.bind,
        ws_port: file.websocket.port,
        db_path: file.database.path.unwrap_or_else(default_db_path),
        blob_root: file.blobs.root.unwrap_or_else(default_blob_root),
        free_team_limit: file.limits.free_team_limit,
    };

    validate(&config)?;
    Ok(config)
}

fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "auction-hub")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_db_path() -> String {
    data_dir().join("auctions.db").to_string_lossy().into_owned()
}

fn default_blob_root() -> String {
    data_dir().join("blobs").to_string_lossy().into_owned()
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.bind.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "websocket.bind".into(),
            message: "bind address must not be empty".into(),
        });
    }
    if config.free_team_limit == 0 {
        return Err(ConfigError::ValidationError {
            field: "limits.free_team_limit".into(),
            message: "free team limit must be at least 1".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_base(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "auction-hub-config-{tag}-{}",
            crate::store::push_id()
        ));
        std::fs::create_dir_all(dir.join("config")).unwrap();
        dir
    }

    #[test]
    fn missing_file_yields_defaults() {
        let base = std::env::temp_dir().join(format!(
            "auction-hub-config-none-{}",
            crate::store::push_id()
        ));
        let config = load_config_from(&base).unwrap();
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.ws_port, 9480);
        assert_eq!(config.free_team_limit, DEFAULT_FREE_TEAM_LIMIT);
    }

    #[test]
    fn file_overrides_defaults_sparsely() {
        let base = temp_base("partial");
        std::fs::write(
            base.join("config/service.toml"),
            "[websocket]\nbind = \"0.0.0.0\"\nport = 9000\n\n[limits]\nfree_team_limit = 5\n",
        )
        .unwrap();

        let config = load_config_from(&base).unwrap();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.ws_port, 9000);
        assert_eq!(config.free_team_limit, 5);
        // Unspecified sections keep their defaults.
        assert!(config.db_path.ends_with("auctions.db"));

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let base = temp_base("broken");
        std::fs::write(base.join("config/service.toml"), "[websocket\nport=").unwrap();
        assert!(matches!(
            load_config_from(&base).unwrap_err(),
            ConfigError::ParseError { .. }
        ));
        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn zero_team_limit_is_rejected() {
        let base = temp_base("limit");
        std::fs::write(
            base.join("config/service.toml"),
            "[limits]\nfree_team_limit = 0\n",
        )
        .unwrap();
        assert!(matches!(
            load_config_from(&base).unwrap_err(),
            ConfigError::ValidationError { .. }
        ));
        let _ = std::fs::remove_dir_all(&base);
    }
}
