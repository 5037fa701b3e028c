//! Configuration
//!
//! One explicit configuration object, loaded from TOML and overridden from
//! the environment, handed to [`open_store`] to produce a store handle.
//! Nothing is initialised implicitly; two calls give two independent handles.

use crate::error::{StoreError, StoreResult};
use crate::store::{InMemoryObjectStore, LocalFsObjectStore, ObjectStore};
use crate::table::DEFAULT_FAST_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const ENV_BACKEND: &str = "TABLESTORE_BACKEND";
pub const ENV_LOCAL_PATH: &str = "TABLESTORE_LOCAL_PATH";
pub const ENV_APP_KEY: &str = "TABLESTORE_APP_KEY";
pub const ENV_APP_SECRET: &str = "TABLESTORE_APP_SECRET";
pub const ENV_REFRESH_TOKEN: &str = "TABLESTORE_REFRESH_TOKEN";
pub const ENV_CACHE_TTL_SECS: &str = "TABLESTORE_CACHE_TTL_SECS";

/// Which object store backs the tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-memory store (for tests)
    Memory,
    /// Local filesystem directory
    Local,
    /// Remote RPC store
    Remote,
}

impl std::str::FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "local" => Ok(BackendKind::Local),
            "remote" => Ok(BackendKind::Remote),
            other => Err(StoreError::Config(format!("unknown backend '{}'", other))),
        }
    }
}

/// Remote store credentials and endpoints
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub app_key: String,
    pub app_secret: String,
    pub refresh_token: String,
    pub token_url: String,
    pub api_url: String,
    pub content_url: String,
    #[serde(rename = "request_timeout_secs", with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            app_key: String::new(),
            app_secret: String::new(),
            refresh_token: String::new(),
            token_url: "https://api.dropboxapi.com/oauth2/token".to_string(),
            api_url: "https://api.dropboxapi.com/2".to_string(),
            content_url: "https://content.dropboxapi.com/2".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("app_key", &self.app_key)
            .field("token_url", &self.token_url)
            .field("api_url", &self.api_url)
            .field("content_url", &self.content_url)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Paths of the system's tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TablePaths {
    pub master_data: String,
    pub periods: String,
    pub activity_log: String,
}

impl Default for TablePaths {
    fn default() -> Self {
        TablePaths {
            master_data: "/audit/master_data.sheet".to_string(),
            periods: "/audit/periods.sheet".to_string(),
            activity_log: "/audit/activity_log.sheet".to_string(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendKind,
    /// Root directory for the local backend
    pub local_path: Option<PathBuf>,
    pub remote: RemoteConfig,
    /// Freshness bound for cached reads
    #[serde(rename = "cache_ttl_secs", with = "duration_secs")]
    pub cache_ttl: Duration,
    /// Tables with fewer rows use the fast encoder
    pub fast_encoder_threshold: usize,
    pub paths: TablePaths,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: BackendKind::Memory,
            local_path: None,
            remote: RemoteConfig::default(),
            cache_ttl: Duration::from_secs(300),
            fast_encoder_threshold: DEFAULT_FAST_THRESHOLD,
            paths: TablePaths::default(),
        }
    }
}

impl StoreConfig {
    /// Config for a local directory
    pub fn local(path: PathBuf) -> Self {
        StoreConfig {
            backend: BackendKind::Local,
            local_path: Some(path),
            ..Default::default()
        }
    }

    /// In-memory config for testing
    pub fn test() -> Self {
        StoreConfig {
            backend: BackendKind::Memory,
            cache_ttl: Duration::from_secs(1),
            ..Default::default()
        }
    }

    pub fn from_toml(text: &str) -> StoreResult<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(format!("invalid config: {}", e)))
    }

    /// Read a TOML file, apply environment overrides and validate
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&text)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> StoreResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> StoreResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, keyed by the `TABLESTORE_*` names
    pub fn apply_overrides<F>(&mut self, lookup: F) -> StoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup(ENV_BACKEND) {
            self.backend = backend.parse()?;
        }
        if let Some(path) = lookup(ENV_LOCAL_PATH) {
            self.local_path = Some(PathBuf::from(path));
        }
        if let Some(key) = lookup(ENV_APP_KEY) {
            self.remote.app_key = key;
        }
        if let Some(secret) = lookup(ENV_APP_SECRET) {
            self.remote.app_secret = secret;
        }
        if let Some(token) = lookup(ENV_REFRESH_TOKEN) {
            self.remote.refresh_token = token;
        }
        if let Some(ttl) = lookup(ENV_CACHE_TTL_SECS) {
            let secs: u64 = ttl.trim().parse().map_err(|_| {
                StoreError::Config(format!(
                    "{} must be whole seconds, got '{}'",
                    ENV_CACHE_TTL_SECS, ttl
                ))
            })?;
            self.cache_ttl = Duration::from_secs(secs);
        }
        Ok(())
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.backend == BackendKind::Local {
            match &self.local_path {
                Some(path) if !path.as_os_str().is_empty() => {}
                _ => {
                    return Err(StoreError::Config(
                        "local backend needs a non-empty local_path".to_string(),
                    ))
                }
            }
        }
        for (name, path) in [
            ("master_data", &self.paths.master_data),
            ("periods", &self.paths.periods),
            ("activity_log", &self.paths.activity_log),
        ] {
            if !path.starts_with('/') {
                return Err(StoreError::Config(format!(
                    "paths.{} must start with '/', got '{}'",
                    name, path
                )));
            }
        }
        Ok(())
    }
}

/// Open a store handle for `config`.
///
/// The remote backend authenticates here and fails with `Auth` on missing
/// or rejected credentials.
pub async fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn ObjectStore>> {
    config.validate()?;
    match config.backend {
        BackendKind::Memory => Ok(Arc::new(InMemoryObjectStore::new())),
        BackendKind::Local => {
            let path = config
                .local_path
                .clone()
                .ok_or_else(|| StoreError::Config("local_path is not set".to_string()))?;
            Ok(Arc::new(LocalFsObjectStore::new(path)))
        }
        BackendKind::Remote => open_remote(&config.remote).await,
    }
}

#[cfg(feature = "remote")]
async fn open_remote(remote: &RemoteConfig) -> StoreResult<Arc<dyn ObjectStore>> {
    use crate::store::{RemoteCredentials, RemoteEndpoints, RemoteObjectStore};

    let credentials = RemoteCredentials::new(
        remote.app_key.clone(),
        remote.app_secret.clone(),
        remote.refresh_token.clone(),
    );
    let endpoints = RemoteEndpoints {
        token_url: remote.token_url.clone(),
        api_url: remote.api_url.clone(),
        content_url: remote.content_url.clone(),
    };
    let store = RemoteObjectStore::bootstrap(credentials, endpoints, remote.request_timeout).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "remote"))]
async fn open_remote(_remote: &RemoteConfig) -> StoreResult<Arc<dyn ObjectStore>> {
    Err(StoreError::Config(
        "remote backend requires the `remote` feature".to_string(),
    ))
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
