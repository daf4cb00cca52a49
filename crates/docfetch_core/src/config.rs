use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::remote::DEFAULT_USER_AGENT;

pub const DEFAULT_CONNECTION_ID: &str = "default";
pub const DEFAULT_CATEGORY: &str = "pages";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConnectionSection {
    pub id: Option<String>,
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncSection {
    pub default_category: Option<String>,
}

impl ToolConfig {
    /// Resolve the remote base URL: env CONFLUENCE_BASE_URL > config > None.
    pub fn base_url_owned(&self) -> Option<String> {
        if let Ok(value) = env::var("CONFLUENCE_BASE_URL") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
        self.connection.base_url.clone()
    }

    /// Resolve user agent: env CONFLUENCE_USER_AGENT > config > default.
    pub fn user_agent(&self) -> String {
        if let Ok(value) = env::var("CONFLUENCE_USER_AGENT") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.connection
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn connection_id(&self) -> String {
        self.connection
            .id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_CONNECTION_ID)
            .to_string()
    }

    pub fn default_category(&self) -> String {
        self.sync
            .default_category
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string()
    }
}

/// Load a ToolConfig from a TOML file. Returns default if the file
/// doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_empty() {
        let config = ToolConfig::default();
        assert!(config.connection.base_url.is_none());
        assert_eq!(config.connection_id(), "default");
        assert_eq!(config.default_category(), "pages");
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert!(config.connection.base_url.is_none());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[connection]
id = "work"
base_url = "https://wiki.example.org"
user_agent = "test-agent/1.0"

[sync]
default_category = "engineering"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.connection_id(), "work");
        assert_eq!(
            config.connection.base_url.as_deref(),
            Some("https://wiki.example.org")
        );
        assert_eq!(config.default_category(), "engineering");
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[connection]\nid = \"only\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.connection_id(), "only");
        assert_eq!(config.default_category(), "pages");
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[connection\nid = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}
