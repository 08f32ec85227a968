use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Requests per second granted by NCBI once an API key is presented.
pub const DEFAULT_KEYED_RATE: f64 = 8.0;

/// Requests per second allowed for anonymous E-utilities clients.
pub const ANONYMOUS_RATE: f64 = 1.0;

/// Root application configuration, loaded from `~/.config/citescout/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub pubmed: PubmedConfig,
    pub pool: PoolConfig,
    pub matcher: MatcherConfig,
    pub ranking: RankingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubmedConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_key_env: String,
    /// Only honoured when a credential is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
    pub request_timeout_secs: u64,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub search_retmax: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub search_batch_size: usize,
    pub fetch_chunk_size: usize,
    /// Fetches with fewer ids than this run without a worker pool.
    pub fetch_sequential_below: usize,
    pub shutdown_grace_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    pub args: Vec<String>,
    pub exchange_file: String,
    pub output_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub excluded_annotators: Vec<String>,
    pub fallback_bucket: String,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for CoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("citescout");
        Self {
            data_dir: data_dir.to_string_lossy().to_string(),
        }
    }
}

impl Default for PubmedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            api_key: None,
            api_key_env: "NCBI_API_KEY".to_string(),
            requests_per_second: None,
            request_timeout_secs: 30,
            tool: "citescout".to_string(),
            email: None,
            search_retmax: 100,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            search_batch_size: 10,
            fetch_chunk_size: 200,
            fetch_sequential_below: 201,
            shutdown_grace_ms: 500,
            max_workers: None,
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            exchange_file: "exchange.json".to_string(),
            output_file: "matches.json".to_string(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            excluded_annotators: vec!["JY".to_string()],
            fallback_bucket: "OTHER".to_string(),
        }
    }
}

impl PubmedConfig {
    /// API key from the config file, else from the configured env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }

    /// Requests per second for the shared gate: 1 without a credential,
    /// otherwise the configured value or the keyed default.
    pub fn effective_rate(&self, api_key: Option<&str>) -> f64 {
        match api_key {
            None => ANONYMOUS_RATE,
            Some(_) => self
                .requests_per_second
                .filter(|r| r.is_finite() && *r > 0.0)
                .unwrap_or(DEFAULT_KEYED_RATE),
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/citescout/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CITESCOUT_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("citescout")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool.search_batch_size == 0 || self.pool.fetch_chunk_size == 0 {
            return Err(CoreError::ConfigError(
                "pool batch and chunk sizes must be at least 1".to_string(),
            ));
        }
        if self.pool.max_workers == Some(0) {
            return Err(CoreError::ConfigError("pool.max_workers must be at least 1".to_string()));
        }
        if self.ranking.fallback_bucket.trim().is_empty() {
            return Err(CoreError::ConfigError(
                "ranking.fallback_bucket must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    // ─── Derived paths ─────────────────────────────────────

    /// Path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.core.data_dir).join("citescout.db")
    }

    /// Directory holding exchange files shared with the matcher.
    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.core.data_dir).join("work")
    }

    pub fn exchange_path(&self) -> PathBuf {
        self.work_dir().join(&self.matcher.exchange_file)
    }

    pub fn matcher_output_path(&self) -> PathBuf {
        self.work_dir().join(&self.matcher.output_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.pool.fetch_chunk_size, 200);
        assert_eq!(cfg.pool.fetch_sequential_below, 201);
        assert_eq!(cfg.ranking.fallback_bucket, "OTHER");
        assert_eq!(cfg.ranking.excluded_annotators, vec!["JY".to_string()]);
        assert!(!cfg.core.data_dir.is_empty());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.pubmed.requests_per_second = Some(5.0);
        cfg.matcher.program = Some("/usr/local/bin/match-titles".to_string());
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.pubmed.requests_per_second, Some(5.0));
        assert_eq!(loaded.matcher.program, cfg.matcher.program);
        assert_eq!(loaded.pool.shutdown_grace_ms, cfg.pool.shutdown_grace_ms);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pubmed]\napi_key = \"abc\"\n").unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.pubmed.api_key.as_deref(), Some("abc"));
        assert_eq!(loaded.pubmed.request_timeout_secs, 30);
        assert_eq!(loaded.pool.search_batch_size, 10);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pool]\nsearch_batch_size = 0\n").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, CoreError::ConfigError(_)));
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let cfg = AppConfig::load_from(Path::new("/tmp/nonexistent_citescout_config.toml")).unwrap();
        assert_eq!(cfg.ranking.fallback_bucket, "OTHER");
    }

    #[test]
    fn test_rate_without_credential_is_one() {
        let mut cfg = PubmedConfig::default();
        cfg.requests_per_second = Some(10.0);
        assert_eq!(cfg.effective_rate(None), 1.0);
    }

    #[test]
    fn test_rate_with_credential() {
        let mut cfg = PubmedConfig::default();
        assert_eq!(cfg.effective_rate(Some("key")), 8.0);
        cfg.requests_per_second = Some(3.0);
        assert_eq!(cfg.effective_rate(Some("key")), 3.0);
        cfg.requests_per_second = Some(0.0);
        assert_eq!(cfg.effective_rate(Some("key")), 8.0);
    }

    #[test]
    fn test_derived_paths() {
        let cfg = AppConfig::default();
        assert!(cfg.database_path().to_string_lossy().ends_with("citescout.db"));
        assert!(cfg.exchange_path().starts_with(cfg.work_dir()));
        assert!(cfg.matcher_output_path().to_string_lossy().ends_with("matches.json"));
    }
}
