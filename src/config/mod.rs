use notify::{Event, EventKind, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::CacheConfig;
use crate::error::{AggregatorError, Result};
use crate::orchestrator::OrchestratorOptions;
use crate::proxy::{ProxyEndpoint, RotationKind, RotationSettings};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub targets: Vec<String>,
    pub proxy: ProxySettings,
    pub backends: Vec<BackendConfig>,
    pub orchestrator: OrchestratorSettings,
    pub cache: CacheSettings,
    pub storage: StorageSettings,
    pub monitoring: MonitorSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxySettings {
    pub endpoints: Vec<String>,
    pub strategy: RotationKind,
    pub max_failures: u32,
    pub reactivation_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    HtmlListing,
    JsonApi,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub id: String,
    pub kind: BackendKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub requires_proxy: bool,
    pub offers_field: Option<String>,
    pub selectors: Option<ListingSelectors>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListingSelectors {
    pub offer: String,
    pub title: String,
    pub price: String,
    pub original_price: String,
    pub brand: String,
    pub availability: String,
    pub image: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            offer: ".offer-card".to_string(),
            title: ".offer-title".to_string(),
            price: ".offer-price".to_string(),
            original_price: ".offer-original-price".to_string(),
            brand: ".offer-brand".to_string(),
            availability: ".offer-availability".to_string(),
            image: "img".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorSettings {
    pub timeout_per_backend_ms: u64,
    pub max_retries_per_backend: u32,
    pub backoff_ms: (u64, u64), // milliseconds, jitter range
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    pub offers_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub proxy_ttl_secs: u64,
    pub health_ttl_secs: u64,
    pub default_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorSettings {
    pub api_port: u16,
    pub discord_webhook_url: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ProxySettings {
    pub fn rotation_settings(&self) -> RotationSettings {
        RotationSettings {
            max_failures: self.max_failures,
            reactivation_delay: Duration::from_millis(self.reactivation_delay_ms),
        }
    }
}

impl OrchestratorSettings {
    pub fn to_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            timeout_per_backend: Duration::from_millis(self.timeout_per_backend_ms),
            max_retries_per_backend: self.max_retries_per_backend,
            backoff_ms: self.backoff_ms,
        }
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            offers_ttl: Duration::from_secs(self.offers_ttl_secs),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            proxy_ttl: Duration::from_secs(self.proxy_ttl_secs),
            health_ttl: Duration::from_secs(self.health_ttl_secs),
            default_ttl: Duration::from_secs(self.default_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: vec!["https://shop.example/deals".to_string()],
            proxy: ProxySettings {
                endpoints: vec![],
                strategy: RotationKind::RoundRobin,
                max_failures: 3,
                reactivation_delay_ms: 30_000,
            },
            backends: vec![
                BackendConfig {
                    id: "listing-html".to_string(),
                    kind: BackendKind::HtmlListing,
                    enabled: true,
                    requires_proxy: false,
                    selectors: None,
                    offers_field: None,
                },
                BackendConfig {
                    id: "listing-api".to_string(),
                    kind: BackendKind::JsonApi,
                    enabled: true,
                    requires_proxy: false,
                    selectors: None,
                    offers_field: Some("offers".to_string()),
                },
            ],
            orchestrator: OrchestratorSettings {
                timeout_per_backend_ms: 30_000,
                max_retries_per_backend: 3,
                backoff_ms: (250, 1500),
            },
            cache: CacheSettings {
                offers_ttl_secs: 300,
                session_ttl_secs: 1800,
                proxy_ttl_secs: 600,
                health_ttl_secs: 30,
                default_ttl_secs: 120,
                sweep_interval_secs: 300,
            },
            storage: StorageSettings {
                directory: PathBuf::from("./aggregated_data"),
            },
            monitoring: MonitorSettings {
                api_port: 8080,
                discord_webhook_url: None,
            },
        }
    }
}

#[async_trait::async_trait]
pub trait ConfigManager {
    async fn load_config(&self) -> Result<Config>;
    async fn save_config(&self, config: &Config) -> Result<()>;
    async fn watch_config_changes(&self) -> Result<tokio::sync::mpsc::Receiver<Config>>;
    fn validate_config(&self, config: &Config) -> Result<()>;
}

pub struct FileConfigManager {
    config_path: PathBuf,
}

impl FileConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

#[async_trait::async_trait]
impl ConfigManager for FileConfigManager {
    async fn load_config(&self) -> Result<Config> {
        info!("Loading configuration from {:?}", self.config_path);

        // check if config file exists, create default if not
        if !self.config_path.exists() {
            warn!(
                "Configuration file not found, creating default config at {:?}",
                self.config_path
            );
            self.create_default_config().await?;
        }

        let config_content = fs::read_to_string(&self.config_path).map_err(|e| {
            AggregatorError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: Config = toml::from_str(&config_content).map_err(|e| {
            AggregatorError::ConfigError(format!("Failed to parse TOML config: {}", e))
        })?;

        self.validate_config(&config)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    async fn save_config(&self, config: &Config) -> Result<()> {
        info!("Saving configuration to {:?}", self.config_path);

        let toml_content = toml::to_string_pretty(config).map_err(|e| {
            AggregatorError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(&self.config_path, toml_content).map_err(|e| {
            AggregatorError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        info!("Configuration saved successfully");
        Ok(())
    }

    async fn watch_config_changes(&self) -> Result<tokio::sync::mpsc::Receiver<Config>> {
        let (tx, rx) = mpsc::channel(10);
        let config_path = self.config_path.clone();
        let config_manager = FileConfigManager::new(config_path.clone());

        tokio::spawn(async move {
            if let Err(e) = Self::watch_config_file(config_path, tx, config_manager).await {
                error!("Configuration file watcher error: {}", e);
            }
        });

        Ok(rx)
    }

    fn validate_config(&self, config: &Config) -> Result<()> {
        debug!("Validating configuration");

        // checking target list
        if config.targets.is_empty() {
            return Err(
                AggregatorError::ConfigError("Targets list cannot be empty".to_string()).into(),
            );
        }
        for target in &config.targets {
            if !target.starts_with("http://") && !target.starts_with("https://") {
                return Err(AggregatorError::ConfigError(format!(
                    "Target '{}' must start with http:// or https://",
                    target
                ))
                .into());
            }
            if target.contains(' ') {
                return Err(AggregatorError::ConfigError(format!(
                    "Target '{}' cannot contain spaces",
                    target
                ))
                .into());
            }
        }

        // checking proxy settings
        for endpoint in &config.proxy.endpoints {
            ProxyEndpoint::parse(endpoint)?;
        }
        if config.proxy.max_failures == 0 {
            return Err(AggregatorError::ConfigError(
                "max_failures must be greater than 0".to_string(),
            )
            .into());
        }
        if config.proxy.max_failures > 10 {
            return Err(
                AggregatorError::ConfigError("max_failures cannot exceed 10".to_string()).into(),
            );
        }

        // checking backend configs
        if config.backends.is_empty() {
            return Err(
                AggregatorError::ConfigError("Backends list cannot be empty".to_string()).into(),
            );
        }
        let mut ids = std::collections::HashSet::new();
        for backend in &config.backends {
            if backend.id.trim().is_empty() {
                return Err(AggregatorError::ConfigError(
                    "Backend id cannot be empty".to_string(),
                )
                .into());
            }
            if !ids.insert(backend.id.clone()) {
                return Err(AggregatorError::ConfigError(format!(
                    "Duplicate backend id '{}'",
                    backend.id
                ))
                .into());
            }
        }

        // checking orchestrator budgets
        if config.orchestrator.timeout_per_backend_ms == 0 {
            return Err(AggregatorError::ConfigError(
                "timeout_per_backend_ms must be greater than 0".to_string(),
            )
            .into());
        }
        if config.orchestrator.timeout_per_backend_ms > 300_000 {
            return Err(AggregatorError::ConfigError(
                "timeout_per_backend_ms cannot exceed 5 minutes".to_string(),
            )
            .into());
        }
        if config.orchestrator.max_retries_per_backend == 0 {
            return Err(AggregatorError::ConfigError(
                "max_retries_per_backend must be greater than 0".to_string(),
            )
            .into());
        }
        if config.orchestrator.max_retries_per_backend > 10 {
            return Err(AggregatorError::ConfigError(
                "max_retries_per_backend cannot exceed 10".to_string(),
            )
            .into());
        }
        if config.orchestrator.backoff_ms.0 >= config.orchestrator.backoff_ms.1 {
            return Err(AggregatorError::ConfigError(
                "backoff_ms minimum must be less than maximum".to_string(),
            )
            .into());
        }
        if config.orchestrator.backoff_ms.1 > 60_000 {
            return Err(AggregatorError::ConfigError(
                "backoff_ms maximum cannot exceed 60 seconds".to_string(),
            )
            .into());
        }

        // checking cache TTLs
        let ttls = [
            config.cache.offers_ttl_secs,
            config.cache.session_ttl_secs,
            config.cache.proxy_ttl_secs,
            config.cache.health_ttl_secs,
            config.cache.default_ttl_secs,
            config.cache.sweep_interval_secs,
        ];
        if ttls.iter().any(|ttl| *ttl == 0) {
            return Err(AggregatorError::ConfigError(
                "Cache TTLs and sweep interval must be greater than 0".to_string(),
            )
            .into());
        }

        // checking monitoring config
        if config.monitoring.api_port < 1024 {
            return Err(AggregatorError::ConfigError(
                "api_port must be between 1024 and 65535".to_string(),
            )
            .into());
        }
        if let Some(ref webhook_url) = config.monitoring.discord_webhook_url {
            if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
                return Err(AggregatorError::ConfigError(
                    "discord_webhook_url must start with http:// or https://".to_string(),
                )
                .into());
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl FileConfigManager {
    /// Create a default configuration file
    async fn create_default_config(&self) -> Result<()> {
        let default_config = Config::default();
        let toml_content = toml::to_string_pretty(&default_config).map_err(|e| {
            AggregatorError::ConfigError(format!("Failed to serialize default config: {}", e))
        })?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AggregatorError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        fs::write(&self.config_path, toml_content).map_err(|e| {
            AggregatorError::ConfigError(format!("Failed to write default config: {}", e))
        })?;

        info!("Default configuration file created at {:?}", self.config_path);
        Ok(())
    }

    /// Watch configuration file for changes and send updates through the channel
    async fn watch_config_file(
        config_path: PathBuf,
        tx: mpsc::Sender<Config>,
        config_manager: FileConfigManager,
    ) -> Result<()> {
        let (file_tx, mut file_rx) = mpsc::channel(100);

        // Set up file system watcher
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(e) = file_tx.blocking_send(event) {
                    error!("Failed to send file system event: {}", e);
                }
            }
            Err(e) => error!("File system watcher error: {}", e),
        })
        .map_err(|e| {
            AggregatorError::ConfigError(format!("Failed to create file watcher: {}", e))
        })?;

        // Watch the config file's parent directory
        let watch_path = config_path.parent().unwrap_or(&config_path);
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                AggregatorError::ConfigError(format!("Failed to watch config directory: {}", e))
            })?;

        info!("Started watching configuration file: {:?}", config_path);

        // Process file system events
        while let Some(event) = file_rx.recv().await {
            match event.kind {
                EventKind::Modify(_) | EventKind::Create(_) => {
                    // Check if the event is for our config file
                    if event.paths.iter().any(|p| p == &config_path) {
                        debug!("Configuration file changed, reloading...");

                        // Add a small delay to ensure file write is complete
                        tokio::time::sleep(Duration::from_millis(100)).await;

                        match config_manager.load_config().await {
                            Ok(new_config) => {
                                info!("Configuration reloaded successfully");
                                if let Err(e) = tx.send(new_config).await {
                                    error!("Failed to send updated config: {}", e);
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("Failed to reload configuration: {}", e);
                                // Continue watching even if reload fails
                            }
                        }
                    }
                }
                _ => {} // Ignore other event types
            }
        }

        Ok(())
    }
}
