use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clients::{plan_series_cleanup, EpisodeMeta, Indexer, IndexerItem};
use crate::config::{CleanupMode, ServiceConfig};
use crate::models::SeasonStats;
use crate::services::legacy::{IGNORE_TAG, TAG_PREFIX};

const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct ArrTag {
    id: i64,
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrImage {
    cover_type: String,
    remote_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrMovie {
    id: i64,
    title: String,
    year: Option<i64>,
    tmdb_id: Option<i64>,
    #[serde(default)]
    size_on_disk: i64,
    #[serde(default)]
    tags: Vec<i64>,
    #[serde(default)]
    images: Vec<ArrImage>,
    added: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrSeasonStatistics {
    #[serde(default)]
    episode_file_count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrSeason {
    season_number: i64,
    statistics: Option<ArrSeasonStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrSeriesStatistics {
    #[serde(default)]
    size_on_disk: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrSeries {
    id: i64,
    title: String,
    year: Option<i64>,
    tmdb_id: Option<i64>,
    tvdb_id: Option<i64>,
    #[serde(default)]
    tags: Vec<i64>,
    #[serde(default)]
    images: Vec<ArrImage>,
    #[serde(default)]
    seasons: Vec<ArrSeason>,
    statistics: Option<ArrSeriesStatistics>,
    added: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrEpisode {
    id: i64,
    season_number: i64,
    episode_number: i64,
    air_date_utc: Option<DateTime<Utc>>,
    episode_file_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrHistoryRecord {
    date: DateTime<Utc>,
    event_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MonitorUpdate {
    episode_ids: Vec<i64>,
    monitored: bool,
}

/// Shared plumbing for the two *arr-compatible indexers.
struct ArrClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    tag_cache: Cache<&'static str, Arc<HashMap<i64, String>>>,
}

impl ArrClient {
    fn new(http: reqwest::Client, cfg: &ServiceConfig) -> Self {
        Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            tag_cache: Cache::builder().time_to_live(CACHE_TTL).build(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v3{path}", self.base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.http
            .delete(self.url(path))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn put_json<B: serde::Serialize>(&self, path: &str, body: &B) -> anyhow::Result<()> {
        self.http
            .put(self.url(path))
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn tag_map(&self) -> anyhow::Result<Arc<HashMap<i64, String>>> {
        if let Some(map) = self.tag_cache.get("tags").await {
            return Ok(map);
        }
        let tags: Vec<ArrTag> = self.get_json("/tag").await?;
        let map = Arc::new(tags.into_iter().map(|t| (t.id, t.label)).collect());
        self.tag_cache.insert("tags", Arc::clone(&map)).await;
        Ok(map)
    }

    fn labels(&self, ids: &[i64], map: &HashMap<i64, String>) -> Vec<String> {
        ids.iter().filter_map(|id| map.get(id).cloned()).collect()
    }

    /// Delete the tag definitions for every engine-owned label; the indexer
    /// cascades the removal to all items carrying them.
    async fn reset_tags(&self, additional: &[String]) -> anyhow::Result<()> {
        let tags: Vec<ArrTag> = self.get_json("/tag").await?;
        for tag in tags {
            let engine_owned = tag.label.starts_with(TAG_PREFIX) && tag.label != IGNORE_TAG;
            if engine_owned || additional.iter().any(|a| a == &tag.label) {
                debug!("removing indexer tag '{}'", tag.label);
                self.delete(&format!("/tag/{}", tag.id)).await?;
            }
        }
        Ok(())
    }

    async fn ensure_tag(&self, label: &str) -> anyhow::Result<i64> {
        let tags: Vec<ArrTag> = self.get_json("/tag").await?;
        if let Some(tag) = tags.iter().find(|t| t.label == label) {
            return Ok(tag.id);
        }
        let created: ArrTag = self
            .post_json("/tag", &serde_json::json!({ "label": label }))
            .await?;
        self.tag_cache.invalidate_all();
        Ok(created.id)
    }

    /// Latest import recorded in the item's history after `since`.
    async fn latest_import(
        &self,
        history_path: &str,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let records: Vec<ArrHistoryRecord> = self.get_json(history_path).await?;
        let latest = records
            .into_iter()
            .filter(|r| r.event_type == "downloadFolderImported")
            .filter(|r| since.map(|s| r.date > s).unwrap_or(true))
            .map(|r| r.date)
            .max();
        Ok(latest)
    }

    fn poster(images: &[ArrImage]) -> Option<String> {
        images
            .iter()
            .find(|i| i.cover_type == "poster")
            .and_then(|i| i.remote_url.clone())
    }
}

/// Movie indexer over the *arr v3 API.
pub struct MovieIndexerClient {
    arr: ArrClient,
    items: Cache<&'static str, Arc<Vec<IndexerItem>>>,
}

impl MovieIndexerClient {
    pub fn new(http: reqwest::Client, cfg: &ServiceConfig) -> Self {
        Self {
            arr: ArrClient::new(http, cfg),
            items: Cache::builder().time_to_live(CACHE_TTL).build(),
        }
    }

    async fn movie(&self, arr_id: i64) -> anyhow::Result<ArrMovie> {
        self.arr.get_json(&format!("/movie/{arr_id}")).await
    }
}

#[async_trait]
impl Indexer for MovieIndexerClient {
    async fn get_all(&self) -> anyhow::Result<Vec<IndexerItem>> {
        if let Some(items) = self.items.get("items").await {
            return Ok(items.as_ref().clone());
        }
        let tag_map = self.arr.tag_map().await?;
        let movies: Vec<ArrMovie> = self.arr.get_json("/movie").await?;
        let items: Vec<IndexerItem> = movies
            .into_iter()
            .map(|m| IndexerItem {
                arr_id: m.id,
                title: m.title,
                year: m.year,
                tmdb_id: m.tmdb_id,
                tvdb_id: None,
                size_on_disk: m.size_on_disk,
                poster_url: ArrClient::poster(&m.images),
                tags: self.arr.labels(&m.tags, &tag_map),
                added: m.added,
                seasons: Vec::new(),
            })
            .collect();
        self.items.insert("items", Arc::new(items.clone())).await;
        Ok(items)
    }

    async fn delete(&self, arr_id: i64) -> anyhow::Result<()> {
        self.arr
            .delete(&format!("/movie/{arr_id}?deleteFiles=true&addImportExclusion=false"))
            .await
    }

    async fn get_added_date(
        &self,
        arr_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let imported = self
            .arr
            .latest_import(&format!("/history/movie?movieId={arr_id}"), since)
            .await?;
        if imported.is_some() {
            return Ok(imported);
        }
        Ok(self.movie(arr_id).await?.added)
    }

    async fn reset_tags(&self, additional: &[String]) -> anyhow::Result<()> {
        self.arr.reset_tags(additional).await?;
        self.invalidate_cache();
        Ok(())
    }

    async fn set_only_ignore_tag(&self, arr_id: i64) -> anyhow::Result<()> {
        let ignore_id = self.arr.ensure_tag(IGNORE_TAG).await?;
        let tag_map = self.arr.tag_map().await?;
        let mut movie: serde_json::Value =
            self.arr.get_json(&format!("/movie/{arr_id}")).await?;
        let mut tags: Vec<i64> = movie["tags"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_i64()).collect())
            .unwrap_or_default();
        tags.retain(|id| {
            tag_map
                .get(id)
                .map(|label| !label.starts_with(TAG_PREFIX))
                .unwrap_or(true)
        });
        tags.push(ignore_id);
        movie["tags"] = serde_json::json!(tags);
        self.arr.put_json(&format!("/movie/{arr_id}"), &movie).await?;
        self.invalidate_cache();
        Ok(())
    }

    fn invalidate_cache(&self) {
        self.items.invalidate_all();
        self.arr.tag_cache.invalidate_all();
    }
}

/// Series indexer over the *arr v3 API. Deletion respects the configured
/// cleanup mode.
pub struct SeriesIndexerClient {
    arr: ArrClient,
    items: Cache<&'static str, Arc<Vec<IndexerItem>>>,
    mode: CleanupMode,
    keep_count: u32,
}

impl SeriesIndexerClient {
    pub fn new(http: reqwest::Client, cfg: &ServiceConfig, mode: CleanupMode, keep_count: u32) -> Self {
        Self {
            arr: ArrClient::new(http, cfg),
            items: Cache::builder().time_to_live(CACHE_TTL).build(),
            mode,
            keep_count,
        }
    }

    async fn episodes(&self, series_id: i64) -> anyhow::Result<Vec<ArrEpisode>> {
        self.arr
            .get_json(&format!("/episode?seriesId={series_id}"))
            .await
    }

    async fn delete_partial(&self, series_id: i64) -> anyhow::Result<()> {
        let episodes = self.episodes(series_id).await?;
        let meta: Vec<EpisodeMeta> = episodes
            .iter()
            .map(|e| EpisodeMeta {
                season: e.season_number,
                episode: e.episode_number,
                air_date: e.air_date_utc,
            })
            .collect();
        let (delete, unmonitor) =
            plan_series_cleanup(&meta, self.mode, self.keep_count, Utc::now());

        for e in &episodes {
            if !delete.contains(&(e.season_number, e.episode_number)) {
                continue;
            }
            let Some(file_id) = e.episode_file_id.filter(|id| *id != 0) else {
                continue;
            };
            if let Err(e) = self.arr.delete(&format!("/episodefile/{file_id}")).await {
                warn!("episode file {file_id} of series {series_id}: delete failed: {e}");
            }
        }

        let unmonitor_ids: Vec<i64> = episodes
            .iter()
            .filter(|e| unmonitor.contains(&(e.season_number, e.episode_number)))
            .map(|e| e.id)
            .collect();
        if !unmonitor_ids.is_empty() {
            self.arr
                .put_json(
                    "/episode/monitor",
                    &MonitorUpdate { episode_ids: unmonitor_ids, monitored: false },
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Indexer for SeriesIndexerClient {
    async fn get_all(&self) -> anyhow::Result<Vec<IndexerItem>> {
        if let Some(items) = self.items.get("items").await {
            return Ok(items.as_ref().clone());
        }
        let tag_map = self.arr.tag_map().await?;
        let series: Vec<ArrSeries> = self.arr.get_json("/series").await?;
        let items: Vec<IndexerItem> = series
            .into_iter()
            .map(|s| IndexerItem {
                arr_id: s.id,
                title: s.title,
                year: s.year,
                tmdb_id: s.tmdb_id,
                tvdb_id: s.tvdb_id,
                size_on_disk: s.statistics.map(|st| st.size_on_disk).unwrap_or(0),
                poster_url: ArrClient::poster(&s.images),
                tags: self.arr.labels(&s.tags, &tag_map),
                added: s.added,
                seasons: s
                    .seasons
                    .into_iter()
                    .map(|season| SeasonStats {
                        season_number: season.season_number,
                        episode_file_count: season
                            .statistics
                            .map(|st| st.episode_file_count)
                            .unwrap_or(0),
                    })
                    .collect(),
            })
            .collect();
        self.items.insert("items", Arc::new(items.clone())).await;
        Ok(items)
    }

    async fn delete(&self, arr_id: i64) -> anyhow::Result<()> {
        match self.mode {
            CleanupMode::All => {
                self.arr
                    .delete(&format!("/series/{arr_id}?deleteFiles=true"))
                    .await
            }
            CleanupMode::KeepEpisodes | CleanupMode::KeepSeasons => {
                self.delete_partial(arr_id).await
            }
        }
    }

    async fn get_added_date(
        &self,
        arr_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let imported = self
            .arr
            .latest_import(&format!("/history/series?seriesId={arr_id}"), since)
            .await?;
        if imported.is_some() {
            return Ok(imported);
        }
        let series: ArrSeries = self.arr.get_json(&format!("/series/{arr_id}")).await?;
        Ok(series.added)
    }

    async fn reset_tags(&self, additional: &[String]) -> anyhow::Result<()> {
        self.arr.reset_tags(additional).await?;
        self.invalidate_cache();
        Ok(())
    }

    async fn set_only_ignore_tag(&self, arr_id: i64) -> anyhow::Result<()> {
        let ignore_id = self.arr.ensure_tag(IGNORE_TAG).await?;
        let tag_map = self.arr.tag_map().await?;
        let mut series: serde_json::Value =
            self.arr.get_json(&format!("/series/{arr_id}")).await?;
        let mut tags: Vec<i64> = series["tags"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_i64()).collect())
            .unwrap_or_default();
        tags.retain(|id| {
            tag_map
                .get(id)
                .map(|label| !label.starts_with(TAG_PREFIX))
                .unwrap_or(true)
        });
        tags.push(ignore_id);
        series["tags"] = serde_json::json!(tags);
        self.arr.put_json(&format!("/series/{arr_id}"), &series).await?;
        self.invalidate_cache();
        Ok(())
    }

    fn invalidate_cache(&self) {
        self.items.invalidate_all();
        self.arr.tag_cache.invalidate_all();
    }
}
