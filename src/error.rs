use thiserror::Error;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("No active proxy endpoint: {0}")]
    NoActiveEndpoint(String),

    #[error("Backend timeout: {0}")]
    BackendTimeout(String),

    #[error("Backend scrape failed: {0}")]
    BackendScrape(String),

    #[error("Cache compute failed: {0}")]
    CacheCompute(String),

    #[error("Persistence write failed: {0}")]
    PersistenceWrite(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),
}

#[derive(Debug)]
pub enum RecoveryStrategy {
    SkipBackend,
    RetryWithBackoff,
    PropagateToCaller,
    LogAndContinue,
    ReloadConfig,
}

impl AggregatorError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            AggregatorError::NoActiveEndpoint(_) => RecoveryStrategy::SkipBackend,
            AggregatorError::BackendTimeout(_) => RecoveryStrategy::RetryWithBackoff,
            AggregatorError::BackendScrape(_) => RecoveryStrategy::RetryWithBackoff,
            AggregatorError::CacheCompute(_) => RecoveryStrategy::PropagateToCaller,
            AggregatorError::PersistenceWrite(_) => RecoveryStrategy::LogAndContinue,
            AggregatorError::NetworkError(_) => RecoveryStrategy::RetryWithBackoff,
            AggregatorError::ParseError(_) => RecoveryStrategy::LogAndContinue,
            AggregatorError::ConfigError(_) => RecoveryStrategy::ReloadConfig,
            AggregatorError::NotificationError(_) => RecoveryStrategy::LogAndContinue,
        }
    }
}

// Conversion implementations for common error types
impl From<std::io::Error> for AggregatorError {
    fn from(err: std::io::Error) -> Self {
        AggregatorError::PersistenceWrite(err.to_string())
    }
}

impl From<serde_json::Error> for AggregatorError {
    fn from(err: serde_json::Error) -> Self {
        AggregatorError::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for AggregatorError {
    fn from(err: toml::de::Error) -> Self {
        AggregatorError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for AggregatorError {
    fn from(err: reqwest::Error) -> Self {
        AggregatorError::NetworkError(err.to_string())
    }
}
