use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;

use crate::clients::ChannelGuide;
use crate::config::ChannelServiceConfig;

#[derive(Debug, Deserialize)]
struct ScheduledItem {
    item_id: String,
    /// Set when the scheduled item is an episode.
    show_id: Option<String>,
}

/// Linear-channel schedule client. An item counts as scheduled when its own
/// id appears (movies) or when any scheduled episode belongs to it (series).
pub struct ChannelServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChannelServiceClient {
    pub fn new(http: reqwest::Client, cfg: &ChannelServiceConfig) -> Self {
        Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChannelGuide for ChannelServiceClient {
    async fn scheduled_ids(&self) -> anyhow::Result<HashSet<String>> {
        let items: Vec<ScheduledItem> = self
            .http
            .get(format!("{}/api/schedule/items", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut ids = HashSet::new();
        for item in items {
            if let Some(show_id) = item.show_id {
                ids.insert(show_id);
            }
            ids.insert(item.item_id);
        }
        Ok(ids)
    }
}
