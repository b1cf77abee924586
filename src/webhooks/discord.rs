use crate::error::{AggregatorError, Result};
use crate::offers::ConsolidatedResult;
use crate::webhooks::WebhookProvider;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

pub struct DiscordWebhook {
    client: Client,
    webhook_url: String,
    rate_limiter: tokio::sync::Semaphore,
}

impl DiscordWebhook {
    pub fn new(webhook_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AggregatorError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            webhook_url,
            rate_limiter: tokio::sync::Semaphore::new(5), // Discord allows 5 requests per 2 seconds
        })
    }

    async fn send_webhook(&self, payload: Value) -> Result<()> {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            AggregatorError::NotificationError(format!("Rate limiter error: {}", e))
        })?;

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                AggregatorError::NotificationError(format!("Failed to send webhook: {}", e))
            })?;

        if response.status().is_success() {
            debug!("Discord webhook sent successfully");
        } else if response.status().as_u16() == 429 {
            // Rate limited, wait and retry
            warn!("Discord webhook rate limited, waiting...");
            sleep(Duration::from_secs(2)).await;
            return Box::pin(self.send_webhook(payload)).await;
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AggregatorError::NotificationError(format!(
                "Discord webhook failed with status {}: {}",
                status, body
            ))
            .into());
        }

        // respect discord rate limits
        sleep(Duration::from_millis(400)).await;
        Ok(())
    }

    fn create_result_embed(&self, result: &ConsolidatedResult) -> Value {
        let highlights: Vec<String> = result
            .offers
            .iter()
            .take(5)
            .map(|offer| format!("• {} — {:.2}", offer.title, offer.price))
            .collect();

        let highlights = if highlights.is_empty() {
            "No offers found".to_string()
        } else {
            highlights.join("\n")
        };

        json!({
            "embeds": [{
                "title": format!("🛒 {} offers from {}", result.offers.len(), result.target_url),
                "color": 0x2ECC71,
                "fields": [
                    {
                        "name": "Top offers",
                        "value": highlights,
                        "inline": false
                    },
                    {
                        "name": "Backends",
                        "value": format!("{}/{} succeeded", result.successful_backends, result.attempts.len()),
                        "inline": true
                    },
                    {
                        "name": "Duplicates removed",
                        "value": result.duplicates_removed.to_string(),
                        "inline": true
                    }
                ],
                "timestamp": result.started_at.to_rfc3339(),
                "footer": {
                    "text": "Offer Aggregator"
                }
            }]
        })
    }

    fn create_alert_embed(&self, level: &str, title: &str, message: &str) -> Value {
        let (color, emoji) = match level.to_lowercase().as_str() {
            "critical" => (0xFF0000, "🚨"), // Red
            "warning" => (0xFFFF00, "⚠️"),  // Yellow
            "info" => (0x0099FF, "ℹ️"),     // Blue
            _ => (0x808080, "📢"),          // Gray
        };

        json!({
            "embeds": [{
                "title": format!("{} {}", emoji, title),
                "description": message,
                "color": color,
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "footer": {
                    "text": "Offer Aggregator Alert"
                }
            }]
        })
    }
}

#[async_trait::async_trait]
impl WebhookProvider for DiscordWebhook {
    async fn notify_result(&self, result: &ConsolidatedResult) -> Result<()> {
        let payload = self.create_result_embed(result);
        self.send_webhook(payload).await
    }

    async fn send_alert(&self, level: &str, title: &str, message: &str) -> Result<()> {
        let payload = self.create_alert_embed(level, title, message);
        self.send_webhook(payload).await
    }
}
