//! In-memory fakes for the upstream capability traits, shared by the
//! service tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::clients::{
    ChannelGuide, CollectionRef, Indexer, IndexerItem, LastPlayed, PlaybackStats,
    RequestDirectory, RequestInfo, StreamingItem, StreamingServer, Upstreams, VirtualFolder,
};
use crate::config::CleanupMode;
use crate::models::{Candidate, MediaType, SeasonStats};

#[derive(Default)]
pub struct FakeIndexer {
    pub items: Mutex<Vec<IndexerItem>>,
    /// Import date per arr_id; `get_added_date` honors the `since` bound.
    pub added: Mutex<HashMap<i64, DateTime<Utc>>>,
    pub deleted: Mutex<Vec<i64>>,
    pub ignore_tagged: Mutex<Vec<i64>>,
    pub tags_reset_with: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Indexer for FakeIndexer {
    async fn get_all(&self) -> anyhow::Result<Vec<IndexerItem>> {
        Ok(self.items.lock().unwrap().clone())
    }

    async fn delete(&self, arr_id: i64) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(arr_id);
        Ok(())
    }

    async fn get_added_date(
        &self,
        arr_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let added = self.added.lock().unwrap().get(&arr_id).copied();
        Ok(match (added, since) {
            (Some(at), Some(bound)) if at <= bound => None,
            (at, _) => at,
        })
    }

    async fn reset_tags(&self, additional: &[String]) -> anyhow::Result<()> {
        self.tags_reset_with.lock().unwrap().push(additional.to_vec());
        Ok(())
    }

    async fn set_only_ignore_tag(&self, arr_id: i64) -> anyhow::Result<()> {
        self.ignore_tagged.lock().unwrap().push(arr_id);
        Ok(())
    }

    fn invalidate_cache(&self) {}
}

#[derive(Default)]
pub struct FakeStreaming {
    pub folders: Vec<VirtualFolder>,
    pub items: HashMap<String, Vec<StreamingItem>>,
    /// Library names whose listing fails.
    pub failing: HashSet<String>,
    pub deleted: Mutex<Vec<String>>,
    pub collections: Mutex<HashMap<String, Vec<String>>>,
}

#[async_trait]
impl StreamingServer for FakeStreaming {
    async fn get_virtual_folders(&self) -> anyhow::Result<Vec<VirtualFolder>> {
        Ok(self.folders.clone())
    }

    async fn list_items(&self, library: &str) -> anyhow::Result<Vec<StreamingItem>> {
        if self.failing.contains(library) {
            anyhow::bail!("library '{library}' unavailable");
        }
        Ok(self.items.get(library).cloned().unwrap_or_default())
    }

    async fn delete_item(&self, id: &str) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn delete_series(
        &self,
        id: &str,
        _mode: CleanupMode,
        _keep_count: u32,
    ) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn find_collection_by_name(&self, name: &str) -> anyhow::Result<Option<CollectionRef>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .contains_key(name)
            .then(|| CollectionRef { id: name.to_string(), name: name.to_string() }))
    }

    async fn create_collection(&self, name: &str, ids: &[String]) -> anyhow::Result<CollectionRef> {
        self.collections
            .lock()
            .unwrap()
            .insert(name.to_string(), ids.to_vec());
        Ok(CollectionRef { id: name.to_string(), name: name.to_string() })
    }

    async fn add_to_collection(&self, collection_id: &str, ids: &[String]) -> anyhow::Result<()> {
        let mut collections = self.collections.lock().unwrap();
        let entry = collections.entry(collection_id.to_string()).or_default();
        entry.extend(ids.iter().cloned());
        Ok(())
    }

    async fn remove_from_collection(
        &self,
        collection_id: &str,
        ids: &[String],
    ) -> anyhow::Result<()> {
        let mut collections = self.collections.lock().unwrap();
        if let Some(entry) = collections.get_mut(collection_id) {
            entry.retain(|id| !ids.contains(id));
        }
        Ok(())
    }

    async fn collection_items(&self, collection_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(collection_id)
            .cloned()
            .unwrap_or_default())
    }

    fn invalidate_cache(&self) {}
}

#[derive(Default)]
pub struct FakeStats {
    pub plays: Mutex<HashMap<String, LastPlayed>>,
}

impl FakeStats {
    pub fn set(&self, id: &str, played: LastPlayed) {
        self.plays.lock().unwrap().insert(id.to_string(), played);
    }
}

#[async_trait]
impl PlaybackStats for FakeStats {
    async fn last_played(&self, streaming_id: &str) -> anyhow::Result<LastPlayed> {
        Ok(self
            .plays
            .lock()
            .unwrap()
            .get(streaming_id)
            .copied()
            .unwrap_or(LastPlayed::Never))
    }
}

#[derive(Default)]
pub struct FakeRequests {
    pub requests: HashMap<i64, RequestInfo>,
}

#[async_trait]
impl RequestDirectory for FakeRequests {
    async fn get_request(
        &self,
        tmdb_id: i64,
        _media_type: MediaType,
    ) -> anyhow::Result<Option<RequestInfo>> {
        Ok(self.requests.get(&tmdb_id).cloned())
    }
}

#[derive(Default)]
pub struct FakeChannels {
    pub scheduled: HashSet<String>,
}

#[async_trait]
impl ChannelGuide for FakeChannels {
    async fn scheduled_ids(&self) -> anyhow::Result<HashSet<String>> {
        Ok(self.scheduled.clone())
    }
}

pub struct UpstreamFakes {
    pub movie_indexer: Arc<FakeIndexer>,
    pub series_indexer: Arc<FakeIndexer>,
    pub streaming: Arc<FakeStreaming>,
    pub stats: Arc<FakeStats>,
    pub requests: Arc<FakeRequests>,
    pub channels: Arc<FakeChannels>,
}

impl UpstreamFakes {
    pub fn upstreams(&self) -> Upstreams {
        Upstreams {
            movie_indexer: self.movie_indexer.clone(),
            series_indexer: self.series_indexer.clone(),
            streaming: self.streaming.clone(),
            stats: self.stats.clone(),
            requests: Some(self.requests.clone()),
            channels: Some(self.channels.clone()),
        }
    }
}

pub fn fakes() -> UpstreamFakes {
    UpstreamFakes {
        movie_indexer: Arc::new(FakeIndexer::default()),
        series_indexer: Arc::new(FakeIndexer::default()),
        streaming: Arc::new(FakeStreaming::default()),
        stats: Arc::new(FakeStats::default()),
        requests: Arc::new(FakeRequests::default()),
        channels: Arc::new(FakeChannels::default()),
    }
}

/// Usage probe reporting the same percentage for every path.
pub struct FixedProbe(pub f64);

impl crate::services::policy::UsageProbe for FixedProbe {
    fn usage_percent(&self, _path: &std::path::Path) -> anyhow::Result<f64> {
        Ok(self.0)
    }
}

pub fn test_config() -> crate::config::Config {
    use crate::config::*;
    use std::collections::HashMap;

    let service = |url: &str| ServiceConfig { url: url.into(), api_key: "key".into() };
    let mut libraries = HashMap::new();
    libraries.insert(
        "Movies".to_string(),
        LibraryConfig {
            enabled: true,
            cleanup_delay_days: 30,
            protection_period_days: 90,
            filter: LibraryFilterConfig {
                content_age_threshold_days: 30,
                last_stream_threshold_days: 30,
                content_size_threshold_bytes: 0,
                exclude_tags: vec!["favorite".into()],
                channel_filter_enabled: true,
            },
            disk_usage_thresholds: vec![],
        },
    );
    libraries.insert(
        "TV".to_string(),
        LibraryConfig {
            enabled: true,
            cleanup_delay_days: 30,
            protection_period_days: 90,
            filter: LibraryFilterConfig::default(),
            disk_usage_thresholds: vec![],
        },
    );

    Config {
        listen: "127.0.0.1:0".into(),
        cleanup_schedule: "0 3 * * *".into(),
        dry_run: false,
        cleanup_mode: CleanupMode::All,
        keep_count: 1,
        enable_leaving_collections: false,
        leaving_collections_movie_name: "Leaving Soon - Movies".into(),
        leaving_collections_tv_name: "Leaving Soon - TV".into(),
        database: DatabaseConfig { path: ":memory:".into() },
        image_cache: ImageCacheConfig::default(),
        movie_indexer: service("http://movies.indexer"),
        series_indexer: service("http://series.indexer"),
        streaming: service("http://streaming"),
        stats: service("http://stats"),
        request_service: None,
        channel_service: None,
        libraries,
        email: None,
        ntfy: None,
        webpush: None,
    }
}

pub fn indexer_movie(arr_id: i64, tmdb_id: i64, title: &str) -> IndexerItem {
    IndexerItem {
        arr_id,
        title: title.into(),
        year: Some(2020),
        tmdb_id: Some(tmdb_id),
        tvdb_id: None,
        size_on_disk: 10 * 1024 * 1024 * 1024,
        poster_url: None,
        tags: vec![],
        added: Some(Utc::now() - Duration::days(200)),
        seasons: vec![],
    }
}

pub fn streaming_movie(id: &str, library: &str, tmdb_id: i64) -> StreamingItem {
    StreamingItem {
        id: id.into(),
        library: library.into(),
        media_type: MediaType::Movie,
        tmdb_id: Some(tmdb_id),
        tvdb_id: None,
        name: id.into(),
    }
}

pub fn movie_candidate(arr_id: i64, title: &str) -> Candidate {
    Candidate {
        media_type: MediaType::Movie,
        arr_id,
        streaming_id: format!("stream-{arr_id}"),
        library_name: "Movies".into(),
        title: title.into(),
        year: Some(2020),
        tmdb_id: Some(1000 + arr_id),
        tvdb_id: None,
        file_size_bytes: 10 * 1024 * 1024 * 1024,
        poster_url: None,
        tags: vec![],
        added_at: Some(Utc::now() - Duration::days(365)),
        requested_by: String::new(),
        seasons: vec![],
    }
}

pub fn series_candidate(arr_id: i64, title: &str, seasons: &[(i64, i64)]) -> Candidate {
    Candidate {
        media_type: MediaType::Tv,
        arr_id,
        streaming_id: format!("show-{arr_id}"),
        library_name: "TV".into(),
        title: title.into(),
        year: Some(2019),
        tmdb_id: None,
        tvdb_id: Some(2000 + arr_id),
        file_size_bytes: 40 * 1024 * 1024 * 1024,
        poster_url: None,
        tags: vec![],
        added_at: Some(Utc::now() - Duration::days(365)),
        requested_by: String::new(),
        seasons: seasons
            .iter()
            .map(|&(season_number, episode_file_count)| SeasonStats {
                season_number,
                episode_file_count,
            })
            .collect(),
    }
}
