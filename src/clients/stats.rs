use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::clients::{LastPlayed, PlaybackStats};
use crate::config::ServiceConfig;

#[derive(Debug, Deserialize)]
struct LastPlayedResponse {
    last_played: Option<DateTime<Utc>>,
}

/// Playback-statistics service client.
pub struct StatsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl StatsClient {
    pub fn new(http: reqwest::Client, cfg: &ServiceConfig) -> Self {
        Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        }
    }
}

#[async_trait]
impl PlaybackStats for StatsClient {
    async fn last_played(&self, streaming_id: &str) -> anyhow::Result<LastPlayed> {
        let resp = self
            .http
            .get(format!("{}/api/items/{streaming_id}/last-played", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        // The stats service has never seen this item.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(LastPlayed::Unknown);
        }
        let body: LastPlayedResponse = resp.error_for_status()?.json().await?;
        Ok(match body.last_played {
            Some(at) => LastPlayed::At(at),
            None => LastPlayed::Never,
        })
    }
}
