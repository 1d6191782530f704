//! Configuration file loading (TOML)

use crate::Config;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Errors that can occur during config loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Strict loader: errors if the file is missing, no side effects.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    debug!(path = %path.display(), "Loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let err = load_config(Path::new("/nonexistent/mibex.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn full_config_parses_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [session]
            command_timeout_ms = 15000

            [backend]
            program = "lldb-mi"
            args = []

            [backend.capabilities]
            supports_process_list = false
            "#,
        )
        .unwrap();
        assert_eq!(config.session.command_timeout_ms, 15_000);
        assert_eq!(config.backend.program, "lldb-mi");
        assert!(!config.backend.capabilities.supports_process_list);
    }
}
