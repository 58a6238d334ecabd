//! Home Assistant state notifications.
//!
//! Pushes [`AppState`] snapshots to a per-card sensor entity over the Home
//! Assistant REST API. The notifier consumes the state broadcast channel,
//! so it observes exactly the snapshots the pipeline publishes. Delivery
//! failures are logged and counted but never reach the pipeline.

use crate::metrics::Metrics;
use crate::models::{AppState, HomeAssistantConfig};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Client for the Home Assistant states API.
pub struct HomeAssistantNotifier {
    client: reqwest::Client,
    api_url: String,
    api_token: String,
}

impl HomeAssistantNotifier {
    pub fn new(config: &HomeAssistantConfig) -> Self {
        let api_url = format!("{}/api", config.base_url.trim_end_matches('/'));
        tracing::info!("Home Assistant notifier initialized with URL: {}", api_url);
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_token: config.api_token.clone(),
        }
    }

    /// Create or update the sensor entity for the snapshot's card.
    pub async fn update_state(&self, state: &AppState) -> Result<(), reqwest::Error> {
        let entity_id = sensor_entity_id(&state.card_id);
        let url = format!("{}/states/{}", self.api_url, entity_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&state_payload(state))
            .send()
            .await?
            .error_for_status()?;

        tracing::info!("Updated sensor {}: {}", entity_id, response.status());
        Ok(())
    }
}

/// Forward every published state snapshot to Home Assistant.
pub fn spawn_notifier(
    notifier: HomeAssistantNotifier,
    mut states: broadcast::Receiver<AppState>,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match states.recv().await {
                Ok(state) => {
                    if let Err(e) = notifier.update_state(&state).await {
                        metrics.record_notify_failure();
                        tracing::error!("Failed to update sensor: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Notifier lagging, skipped {} state updates", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Sensor entity for a card, or the bare application sensor when the
/// card id is empty (the startup snapshot).
fn sensor_entity_id(card_id: &str) -> String {
    if card_id.is_empty() {
        format!("sensor.{}", crate::APP_NAME)
    } else {
        format!("sensor.{}_{}", crate::APP_NAME, card_id)
    }
}

fn state_payload(state: &AppState) -> serde_json::Value {
    json!({
        "state": state.status.to_string(),
        "attributes": {
            "status": state.status,
            "media_count": state.media_count,
            "progress": state.progress,
            "card_id": state.card_id,
            "icon": "mdi:sd",
        },
    })
}
