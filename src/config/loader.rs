use std::path::Path;
use thiserror::Error;
use tokio::fs;

use crate::config::models::ServerConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

pub async fn load_config<P: AsRef<Path>>(path: P) -> ConfigResult<ServerConfig> {
    let config_content = fs::read_to_string(path).await?;
    parse_config(&config_content)
}

pub fn parse_config(content: &str) -> ConfigResult<ServerConfig> {
    let config: ServerConfig = serde_yaml::from_str(content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "listen_addr: \"127.0.0.1:8000\"\nroutes:\n  - action: file\n    path: ./www"
        )
        .unwrap();

        let config = load_config(file.path()).await.unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8000");
        assert_eq!(config.routes.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path().join("nope.yaml")).await.unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        let err = parse_config("listen_addr: [unterminated").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
