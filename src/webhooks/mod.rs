pub mod discord;

use crate::error::Result;
use crate::offers::ConsolidatedResult;

pub use discord::DiscordWebhook;

#[async_trait::async_trait]
pub trait WebhookProvider: Send + Sync {
    async fn notify_result(&self, result: &ConsolidatedResult) -> Result<()>;
    async fn send_alert(&self, level: &str, title: &str, message: &str) -> Result<()>;
}

/// Fans a consolidated result out to every configured provider.
///
/// Delivery failures are logged, never propagated: offers already
/// computed must reach the caller even when notification fails.
pub struct WebhookManager {
    providers: Vec<Box<dyn WebhookProvider>>,
}

impl WebhookManager {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn add_provider(&mut self, provider: Box<dyn WebhookProvider>) {
        self.providers.push(provider);
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub async fn notify_result(&self, result: &ConsolidatedResult) -> Result<()> {
        for provider in &self.providers {
            if let Err(e) = provider.notify_result(result).await {
                tracing::warn!("Webhook provider failed to deliver result: {}", e);
            }
        }
        Ok(())
    }

    pub async fn send_alert(&self, level: &str, title: &str, message: &str) -> Result<()> {
        for provider in &self.providers {
            if let Err(e) = provider.send_alert(level, title, message).await {
                tracing::warn!("Webhook provider failed to deliver alert: {}", e);
            }
        }
        Ok(())
    }
}

impl Default for WebhookManager {
    fn default() -> Self {
        Self::new()
    }
}
