use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

const HOST_ENV: &str = "SCHOLAR_BAR_HOST";

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_max_authors() -> usize {
    6
}

fn default_fields() -> Vec<String> {
    ["corpusId", "title", "year", "venue", "authors"]
        .iter()
        .map(|f| f.to_string())
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub papers: PapersConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub feedback_toggle: bool,
    #[serde(default)]
    pub opt_in: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PapersConfig {
    pub paper_url_base: String,
    pub author_url_base: String,
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
    #[serde(default = "default_max_authors")]
    pub max_authors: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    pub enabled: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            base_url: "http://localhost:8080".to_string(),
            poll_interval_ms: default_poll_interval_ms(),
            feedback_toggle: true,
            opt_in: false,
        }
    }
}

impl Default for PapersConfig {
    fn default() -> Self {
        PapersConfig {
            paper_url_base: "https://www.semanticscholar.org/p".to_string(),
            author_url_base: "https://www.semanticscholar.org/author".to_string(),
            fields: default_fields(),
            max_authors: default_max_authors(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 1100,
            height: 780,
            min_width: 640,
            min_height: 420,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        NotificationConfig { enabled: true }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        let mut config = if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => Self::parse(&contents),
                Err(e) => {
                    warn!(path = %config_path.display(), error = %e, "could not read config, using defaults");
                    Config::default()
                }
            }
        } else {
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            Config::default()
        };

        if let Ok(host) = std::env::var(HOST_ENV) {
            if !host.trim().is_empty() {
                debug!(%host, "backend host overridden from environment");
                config.backend.base_url = host;
            }
        }

        config
    }

    pub fn parse(contents: &str) -> Self {
        match toml::from_str(contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "error parsing config.toml, using defaults");
                Config::default()
            }
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.backend.poll_interval_ms)
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/scholar-bar")
        } else {
            PathBuf::from(".")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [backend]
            base_url = "https://openscholar.example"

            [notifications]
            enabled = false
            "#,
        );
        assert_eq!(config.backend.base_url, "https://openscholar.example");
        assert_eq!(config.backend.poll_interval_ms, 3000);
        assert_eq!(config.papers.max_authors, 6);
        assert!(config.papers.fields.iter().any(|f| f == "corpusId"));
        assert!(!config.notifications.enabled);
        assert_eq!(config.window.width, 1100);
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let config = Config::parse("backend = 12");
        assert_eq!(config.backend.base_url, "http://localhost:8080");
        assert_eq!(config.poll_interval().as_millis(), 3000);
    }
}
