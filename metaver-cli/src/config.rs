use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use metaver_lib::{
    CoordinatorBuilder, Environment, FileTimestampStore, FilesystemFetcher, HttpFetcher,
    ItemTypeRegistry, MemoryTimestampStore, MetadataCoordinator, MetadataFetcher, MetadataScope, StalenessTracker,
    TimestampStore,
};
use serde::Deserialize;

/// Top-level metaver.toml configuration
#[derive(Debug, Deserialize, Default)]
pub struct MetaverConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub timestamps: TimestampConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Item keys admin uploads are restricted to, with their scope. Empty
    /// means any key is accepted.
    #[serde(default)]
    pub items: BTreeMap<String, MetadataScope>,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub shared: SourceConfig,
    #[serde(default)]
    pub app: SourceConfig,
}

/// Where one scope's documents live: `url = "local"` with a directory
/// `path`, or an `http(s)://` base URL.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub url: String,
    pub path: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TimestampBackend {
    Memory,
    File,
}

#[derive(Debug, Deserialize)]
pub struct TimestampConfig {
    #[serde(default = "default_timestamp_backend")]
    pub backend: TimestampBackend,
    #[serde(default = "default_timestamp_dir")]
    pub dir: String,
    #[serde(default = "default_expiry_days")]
    pub expiry_days: u64,
}

#[derive(Debug, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
}

// ── Default value functions ──────────────────────────

fn default_app_name() -> String {
    "app".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_source_url() -> String {
    "local".to_string()
}

fn default_timestamp_backend() -> TimestampBackend {
    TimestampBackend::File
}

fn default_timestamp_dir() -> String {
    "./metadata/.timestamps".to_string()
}

fn default_expiry_days() -> u64 {
    7
}

fn default_poll_seconds() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: Environment::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            hostname: default_hostname(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            path: None,
            token: None,
        }
    }
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            backend: default_timestamp_backend(),
            dir: default_timestamp_dir(),
            expiry_days: default_expiry_days(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_seconds: default_poll_seconds(),
        }
    }
}

fn env_override<T: std::str::FromStr>(
    vars: &impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) {
    if let Some(val) = vars(name) {
        match val.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(variable = name, value = %val, "ignoring invalid override"),
        }
    }
}

impl MetaverConfig {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults; a file that does not parse is an error.
    pub fn load(path: &str) -> Result<Self, String> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                toml::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path, e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(format!("failed to read {}: {}", path, e)),
        }
    }

    /// Apply `MV_*` environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }

    pub fn apply_overrides(&mut self, vars: impl Fn(&str) -> Option<String>) {
        if let Some(name) = vars("MV_APP_NAME") {
            self.app.name = name;
        }
        env_override(&vars, "MV_ENVIRONMENT", &mut self.app.environment);
        env_override(&vars, "MV_PORT", &mut self.server.port);
        if let Some(hostname) = vars("MV_HOSTNAME") {
            self.server.hostname = hostname;
        }

        for (prefix, source) in [
            ("MV_SHARED", &mut self.sources.shared),
            ("MV_APP", &mut self.sources.app),
        ] {
            if let Some(url) = vars(&format!("{}_URL", prefix)) {
                source.url = url;
            }
            if let Some(path) = vars(&format!("{}_PATH", prefix)) {
                source.path = Some(path);
            }
            if let Some(token) = vars(&format!("{}_TOKEN", prefix)) {
                source.token = Some(token);
            }
        }

        if let Some(val) = vars("MV_TIMESTAMPS") {
            match val.to_lowercase().as_str() {
                "memory" => self.timestamps.backend = TimestampBackend::Memory,
                "file" => self.timestamps.backend = TimestampBackend::File,
                other => tracing::warn!(value = other, "unknown MV_TIMESTAMPS value"),
            }
        }
        if let Some(dir) = vars("MV_TIMESTAMPS_DIR") {
            self.timestamps.dir = dir;
        }
        env_override(&vars, "MV_TIMESTAMP_EXPIRY_DAYS", &mut self.timestamps.expiry_days);
        env_override(&vars, "MV_POLL_SECONDS", &mut self.watcher.poll_seconds);
    }

    pub fn source(&self, scope: MetadataScope) -> &SourceConfig {
        match scope {
            MetadataScope::Shared => &self.sources.shared,
            MetadataScope::App => &self.sources.app,
        }
    }

    pub fn build_fetcher(&self, scope: MetadataScope) -> Result<Arc<dyn MetadataFetcher>, String> {
        let source = self.source(scope);
        let environment = self.app.environment;

        if source.url == "local" {
            let path = source.path.clone().unwrap_or_else(|| match scope {
                MetadataScope::Shared => "./metadata/shared".to_string(),
                MetadataScope::App => format!("./metadata/{}", self.app.name),
            });
            return Ok(Arc::new(FilesystemFetcher::new(path, environment)));
        }

        if source.url.starts_with("http://") || source.url.starts_with("https://") {
            let mut fetcher = HttpFetcher::new(&source.url, environment);
            if let Some(ref token) = source.token {
                fetcher = fetcher.token(token);
            }
            return Ok(Arc::new(fetcher));
        }

        Err(format!(
            "unsupported {} source url {:?}: expected \"local\" or an http(s) URL",
            scope, source.url
        ))
    }

    pub fn build_timestamp_store(&self) -> Arc<dyn TimestampStore> {
        match self.timestamps.backend {
            TimestampBackend::Memory => Arc::new(MemoryTimestampStore::new()),
            TimestampBackend::File => Arc::new(FileTimestampStore::new(&self.timestamps.dir)),
        }
    }

    /// Registry built from `[items]`, or `None` when no items are declared.
    pub fn item_types(&self) -> Option<ItemTypeRegistry> {
        if self.items.is_empty() {
            return None;
        }
        let mut types = ItemTypeRegistry::new();
        for (key, scope) in &self.items {
            types.register_untyped(key, *scope);
        }
        Some(types)
    }

    /// Expiry applied to shared timestamps; at least one day.
    pub fn timestamp_ttl(&self) -> Duration {
        Duration::from_secs(self.timestamps.expiry_days.max(1).saturating_mul(24 * 60 * 60))
    }

    pub fn build_tracker(&self) -> StalenessTracker {
        StalenessTracker::new(self.build_timestamp_store(), &self.app.name)
            .with_ttl(self.timestamp_ttl())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.watcher.poll_seconds.max(1))
    }

    /// Load both scopes. Fails when either source is misconfigured or
    /// cannot be read.
    pub async fn build_coordinator(&self) -> Result<MetadataCoordinator, String> {
        CoordinatorBuilder::new()
            .app_name(&self.app.name)
            .environment(self.app.environment)
            .shared_fetcher(self.build_fetcher(MetadataScope::Shared)?)
            .app_fetcher(self.build_fetcher(MetadataScope::App)?)
            .build()
            .await
            .map_err(|e| e.to_string())
    }
}
