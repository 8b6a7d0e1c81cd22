use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::clients::{RequestDirectory, RequestInfo};
use crate::config::ServiceConfig;
use crate::models::MediaType;

#[derive(Debug, Deserialize)]
struct RequestResponse {
    requested_by: String,
    requested_at: DateTime<Utc>,
}

/// Client for the user-request service ("I'd like to watch X").
pub struct RequestServiceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RequestServiceClient {
    pub fn new(http: reqwest::Client, cfg: &ServiceConfig) -> Self {
        Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        }
    }
}

#[async_trait]
impl RequestDirectory for RequestServiceClient {
    async fn get_request(
        &self,
        tmdb_id: i64,
        media_type: MediaType,
    ) -> anyhow::Result<Option<RequestInfo>> {
        let resp = self
            .http
            .get(format!(
                "{}/api/v1/media/{media_type}/{tmdb_id}/request",
                self.base_url
            ))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: RequestResponse = resp.error_for_status()?.json().await?;
        Ok(Some(RequestInfo {
            requested_by: body.requested_by,
            requested_at: body.requested_at,
        }))
    }
}
