//! Configuration loader for weft.
//!
//! Reads `weft.toml` (by default from the data directory, `~/.weft/`) and
//! deserializes it into [`WeftConfig`]. Falls back to defaults when the file
//! is missing or malformed.

use std::path::{Path, PathBuf};

use weft_types::config::WeftConfig;

/// File name of the configuration inside the data directory.
pub const CONFIG_FILE_NAME: &str = "weft.toml";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `WEFT_DATA_DIR` environment variable
/// 2. `~/.weft`
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WEFT_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".weft");
    }

    // Last resort: current directory
    PathBuf::from(".weft")
}

/// `{data_dir}/weft.toml`.
pub fn default_config_path() -> PathBuf {
    default_data_dir().join(CONFIG_FILE_NAME)
}

/// Load configuration from `path`.
///
/// - If the file does not exist, returns [`WeftConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_config(path: &Path) -> WeftConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return WeftConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return WeftConfig::default();
        }
    };

    match toml::from_str::<WeftConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            WeftConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use weft_types::config::{ContinuationMode, StoreBackend};

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join(CONFIG_FILE_NAME)).await;
        assert_eq!(config, WeftConfig::default());
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(
            &path,
            r#"
[barrier]
ttl_secs = 120

[continuations]
mode = "external"

[store]
backend = "sqlite"
"#,
        )
        .await
        .unwrap();

        let config = load_config(&path).await;
        assert_eq!(config.barrier.ttl_secs, 120);
        assert_eq!(config.continuations.mode, ContinuationMode::External);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert!(!config.memory.enabled);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        assert_eq!(load_config(&path).await, WeftConfig::default());
    }

    #[test]
    fn test_default_data_dir_from_env() {
        // SAFETY: This test restores the env var immediately.
        unsafe {
            std::env::set_var("WEFT_DATA_DIR", "/tmp/test-weft");
        }
        assert_eq!(default_data_dir(), PathBuf::from("/tmp/test-weft"));
        assert_eq!(
            default_config_path(),
            PathBuf::from("/tmp/test-weft/weft.toml")
        );
        unsafe {
            std::env::remove_var("WEFT_DATA_DIR");
        }
    }
}
