use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub token: Option<String>,
    #[serde(default = "default_event")]
    pub event: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String { "https://api.github.com".to_string() }
fn default_event() -> String { "pull_request".to_string() }
fn default_status() -> String { "completed".to_string() }
fn default_per_page() -> u32 { 100 }
fn default_timeout_secs() -> u64 { 30 }

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            event: default_event(),
            status: default_status(),
            per_page: default_per_page(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ElasticsearchConfig {
    /// Checks that everything needed to reach the cluster is set.
    pub fn validate(&self) -> Result<()> {
        match self.url.as_deref() {
            Some(url) if !url.trim().is_empty() => {}
            _ => anyhow::bail!("Elasticsearch URL is required"),
        }
        let user = self.username.as_deref().unwrap_or("");
        let password = self.password.as_deref().unwrap_or("");
        if user.is_empty() || password.is_empty() {
            anyhow::bail!("Elasticsearch username and password are required (ELASTICSEARCH_USER, ELASTICSEARCH_PASSWORD)");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_batch_size() -> usize { 500 }
fn default_channel_capacity() -> usize { 500 }

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub output: Option<PathBuf>,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Detect file type by extension and load
    pub fn from_file(path: &Path) -> Result<Self> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "toml" => Self::from_toml_file(path),
            _ => Err(anyhow::anyhow!("Unsupported config file format. Use .yaml, .yml, or .toml")),
        }
    }

    /// Merge with another config, preferring values from other
    pub fn merge(&mut self, other: Config) {
        self.github.api_url = other.github.api_url;
        self.github.event = other.github.event;
        self.github.status = other.github.status;
        self.github.per_page = other.github.per_page;
        self.github.timeout_secs = other.github.timeout_secs;
        if other.github.token.is_some() {
            self.github.token = other.github.token;
        }

        if other.elasticsearch.url.is_some() {
            self.elasticsearch.url = other.elasticsearch.url;
        }
        if other.elasticsearch.username.is_some() {
            self.elasticsearch.username = other.elasticsearch.username;
        }
        if other.elasticsearch.password.is_some() {
            self.elasticsearch.password = other.elasticsearch.password;
        }
        self.elasticsearch.timeout_secs = other.elasticsearch.timeout_secs;

        self.indexing.batch_size = other.indexing.batch_size;
        self.indexing.channel_capacity = other.indexing.channel_capacity;

        self.logging.level = other.logging.level;
        if other.logging.output.is_some() {
            self.logging.output = other.logging.output;
        }
    }

    /// Fill credentials from the environment where the file left them unset.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if self.github.token.is_none() {
            self.github.token = non_empty("GITHUB_TOKEN");
        }
        if self.elasticsearch.username.is_none() {
            self.elasticsearch.username = non_empty("ELASTICSEARCH_USER");
        }
        if self.elasticsearch.password.is_none() {
            self.elasticsearch.password = non_empty("ELASTICSEARCH_PASSWORD");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.event, "pull_request");
        assert_eq!(config.github.status, "completed");
        assert_eq!(config.github.per_page, 100);
        assert_eq!(config.indexing.batch_size, 500);
        assert!(config.github.token.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "elasticsearch:\n  url: http://localhost:9200\nindexing:\n  batch_size: 50\n").unwrap();

        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.elasticsearch.url.as_deref(), Some("http://localhost:9200"));
        assert_eq!(config.indexing.batch_size, 50);
        assert_eq!(config.indexing.channel_capacity, 500);
        assert_eq!(config.github.per_page, 100);
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[github]\nevent = \"push\"\n\n[logging]\nlevel = \"debug\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.github.event, "push");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        fs::write(&path, "").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_merge_keeps_existing_secrets() {
        let mut base = Config::default();
        base.github.token = Some("from-base".into());
        let mut other = Config::default();
        other.indexing.batch_size = 10;

        base.merge(other);

        assert_eq!(base.github.token.as_deref(), Some("from-base"));
        assert_eq!(base.indexing.batch_size, 10);
    }

    #[test]
    fn test_env_fills_only_missing_values() {
        let env: HashMap<&str, &str> = [
            ("GITHUB_TOKEN", "ghp_env"),
            ("ELASTICSEARCH_USER", "elastic"),
            ("ELASTICSEARCH_PASSWORD", ""),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.elasticsearch.username = Some("from-file".into());

        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.github.token.as_deref(), Some("ghp_env"));
        assert_eq!(config.elasticsearch.username.as_deref(), Some("from-file"));
        assert_eq!(config.elasticsearch.password, None);
    }

    #[test]
    fn test_elasticsearch_validation() {
        let mut es = ElasticsearchConfig::default();
        assert!(es.validate().is_err());
        es.url = Some("http://localhost:9200".into());
        assert!(es.validate().is_err());
        es.username = Some("elastic".into());
        es.password = Some("secret".into());
        assert!(es.validate().is_ok());
    }
}
