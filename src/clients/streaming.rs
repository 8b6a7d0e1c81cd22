use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Deserialize;
use tracing::debug;

use crate::clients::{
    plan_series_cleanup, CollectionRef, EpisodeMeta, StreamingItem, StreamingServer, VirtualFolder,
};
use crate::config::{CleanupMode, ServiceConfig};
use crate::models::MediaType;

const CACHE_TTL: Duration = Duration::from_secs(300);
const PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JfVirtualFolder {
    name: String,
    #[serde(default)]
    locations: Vec<String>,
    item_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JfItem {
    id: String,
    name: String,
    #[serde(rename = "Type")]
    item_type: String,
    #[serde(default)]
    provider_ids: HashMap<String, String>,
    parent_index_number: Option<i64>,
    index_number: Option<i64>,
    season_id: Option<String>,
    premiere_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JfItemPage {
    #[serde(default)]
    items: Vec<JfItem>,
    #[serde(default)]
    total_record_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JfCollection {
    id: String,
}

/// Jellyfin-compatible media server client.
pub struct StreamingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    items_cache: Cache<String, Arc<Vec<StreamingItem>>>,
}

impl StreamingClient {
    pub fn new(http: reqwest::Client, cfg: &ServiceConfig) -> Self {
        Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            items_cache: Cache::builder().time_to_live(CACHE_TTL).build(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .header("X-Emby-Token", &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn post(&self, path: &str) -> anyhow::Result<reqwest::Response> {
        let resp = self
            .http
            .post(self.url(path))
            .header("X-Emby-Token", &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp)
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.http
            .delete(self.url(path))
            .header("X-Emby-Token", &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn folders(&self) -> anyhow::Result<Vec<JfVirtualFolder>> {
        self.get_json("/Library/VirtualFolders").await
    }

    fn provider_id(ids: &HashMap<String, String>, key: &str) -> Option<i64> {
        ids.get(key).and_then(|v| v.parse().ok())
    }

    async fn episodes(&self, series_id: &str) -> anyhow::Result<Vec<JfItem>> {
        let page: JfItemPage = self
            .get_json(&format!("/Shows/{series_id}/Episodes?fields=SeasonId"))
            .await?;
        Ok(page.items)
    }
}

#[async_trait]
impl StreamingServer for StreamingClient {
    async fn get_virtual_folders(&self) -> anyhow::Result<Vec<VirtualFolder>> {
        let folders = self.folders().await?;
        Ok(folders
            .into_iter()
            .map(|f| VirtualFolder {
                name: f.name,
                paths: f.locations.into_iter().map(Into::into).collect(),
            })
            .collect())
    }

    async fn list_items(&self, library: &str) -> anyhow::Result<Vec<StreamingItem>> {
        if let Some(items) = self.items_cache.get(library).await {
            return Ok(items.as_ref().clone());
        }

        let folders = self.folders().await?;
        let parent = folders
            .iter()
            .find(|f| f.name == library)
            .and_then(|f| f.item_id.clone())
            .ok_or_else(|| anyhow::anyhow!("library '{library}' not found"))?;

        let mut items = Vec::new();
        let mut start = 0usize;
        loop {
            let page: JfItemPage = self
                .get_json(&format!(
                    "/Items?ParentId={parent}&IncludeItemTypes=Movie,Series&Recursive=true\
                     &Fields=ProviderIds&StartIndex={start}&Limit={PAGE_SIZE}"
                ))
                .await?;
            let fetched = page.items.len();
            for item in page.items {
                let media_type = match item.item_type.as_str() {
                    "Movie" => MediaType::Movie,
                    "Series" => MediaType::Tv,
                    _ => continue,
                };
                items.push(StreamingItem {
                    id: item.id,
                    library: library.to_string(),
                    media_type,
                    tmdb_id: Self::provider_id(&item.provider_ids, "Tmdb"),
                    tvdb_id: Self::provider_id(&item.provider_ids, "Tvdb"),
                    name: item.name,
                });
            }
            start += fetched;
            if fetched < PAGE_SIZE || start >= page.total_record_count {
                break;
            }
        }

        self.items_cache
            .insert(library.to_string(), Arc::new(items.clone()))
            .await;
        Ok(items)
    }

    async fn delete_item(&self, id: &str) -> anyhow::Result<()> {
        self.delete(&format!("/Items/{id}")).await
    }

    async fn delete_series(
        &self,
        id: &str,
        mode: CleanupMode,
        keep_count: u32,
    ) -> anyhow::Result<()> {
        if mode == CleanupMode::All {
            return self.delete_item(id).await;
        }

        let episodes = self.episodes(id).await?;
        let meta: Vec<EpisodeMeta> = episodes
            .iter()
            .map(|e| EpisodeMeta {
                season: e.parent_index_number.unwrap_or(0),
                episode: e.index_number.unwrap_or(0),
                air_date: e.premiere_date,
            })
            .collect();
        let (delete, _) = plan_series_cleanup(&meta, mode, keep_count, Utc::now());

        let mut remaining_per_season: HashMap<String, usize> = HashMap::new();
        let mut to_delete = Vec::new();
        for e in &episodes {
            let key = (e.parent_index_number.unwrap_or(0), e.index_number.unwrap_or(0));
            if delete.contains(&key) {
                to_delete.push(e.id.clone());
            } else if let Some(season_id) = &e.season_id {
                *remaining_per_season.entry(season_id.clone()).or_insert(0) += 1;
            }
        }

        for episode_id in &to_delete {
            self.delete_item(episode_id).await?;
        }

        // Seasons with no episodes left are removed too.
        let season_ids: std::collections::HashSet<String> =
            episodes.iter().filter_map(|e| e.season_id.clone()).collect();
        for season_id in season_ids {
            if remaining_per_season.get(&season_id).copied().unwrap_or(0) == 0 {
                debug!("season {season_id} of series {id} left empty, deleting");
                self.delete_item(&season_id).await?;
            }
        }
        Ok(())
    }

    async fn find_collection_by_name(&self, name: &str) -> anyhow::Result<Option<CollectionRef>> {
        let page: JfItemPage = self
            .get_json("/Items?IncludeItemTypes=BoxSet&Recursive=true")
            .await?;
        Ok(page
            .items
            .into_iter()
            .find(|i| i.name == name)
            .map(|i| CollectionRef { id: i.id, name: name.to_string() }))
    }

    async fn create_collection(&self, name: &str, ids: &[String]) -> anyhow::Result<CollectionRef> {
        let resp = self
            .post(&format!("/Collections?Name={}&Ids={}", name, ids.join(",")))
            .await?;
        let created: JfCollection = resp.json().await?;
        Ok(CollectionRef { id: created.id, name: name.to_string() })
    }

    async fn add_to_collection(&self, collection_id: &str, ids: &[String]) -> anyhow::Result<()> {
        self.post(&format!("/Collections/{collection_id}/Items?Ids={}", ids.join(",")))
            .await?;
        Ok(())
    }

    async fn remove_from_collection(
        &self,
        collection_id: &str,
        ids: &[String],
    ) -> anyhow::Result<()> {
        self.delete(&format!("/Collections/{collection_id}/Items?Ids={}", ids.join(",")))
            .await
    }

    async fn collection_items(&self, collection_id: &str) -> anyhow::Result<Vec<String>> {
        let page: JfItemPage = self
            .get_json(&format!("/Items?ParentId={collection_id}"))
            .await?;
        Ok(page.items.into_iter().map(|i| i.id).collect())
    }

    fn invalidate_cache(&self) {
        self.items_cache.invalidate_all();
    }
}
