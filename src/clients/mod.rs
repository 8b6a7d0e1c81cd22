pub mod channels;
pub mod indexer;
pub mod requests;
pub mod stats;
pub mod streaming;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::CleanupMode;
use crate::models::{MediaType, SeasonStats};

/// Client-wide timeout for every upstream HTTP call.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .expect("reqwest client")
}

/// An item as the indexer sees it.
#[derive(Debug, Clone)]
pub struct IndexerItem {
    pub arr_id: i64,
    pub title: String,
    pub year: Option<i64>,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub size_on_disk: i64,
    pub poster_url: Option<String>,
    /// Resolved tag labels.
    pub tags: Vec<String>,
    /// Import date at the indexer.
    pub added: Option<DateTime<Utc>>,
    /// Season statistics, series only.
    pub seasons: Vec<SeasonStats>,
}

/// An item as the streaming server sees it.
#[derive(Debug, Clone)]
pub struct StreamingItem {
    pub id: String,
    pub library: String,
    pub media_type: MediaType,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct VirtualFolder {
    pub name: String,
    pub paths: Vec<std::path::PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CollectionRef {
    pub id: String,
    pub name: String,
}

/// What the stats service knows about an item's playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastPlayed {
    Never,
    /// The stats service has no record of the item at all.
    Unknown,
    At(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
}

/// A service that tracks wanted media and the files on disk.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn get_all(&self) -> anyhow::Result<Vec<IndexerItem>>;

    /// Destroy the item's files. Movies delete whole; series respect the
    /// configured cleanup mode by orchestrating episode-file calls.
    async fn delete(&self, arr_id: i64) -> anyhow::Result<()>;

    /// Import date, bounded below by `since` when the item was re-imported
    /// after a recorded deletion.
    async fn get_added_date(
        &self,
        arr_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Strip every engine-owned tag (plus `additional`) from all items and
    /// drop the tag definitions.
    async fn reset_tags(&self, additional: &[String]) -> anyhow::Result<()>;

    /// Replace the item's engine tags with the permanent-ignore marker.
    async fn set_only_ignore_tag(&self, arr_id: i64) -> anyhow::Result<()>;

    /// Flush process-local TTL caches, called at the start of each run.
    fn invalidate_cache(&self);
}

/// The end-user-facing media server.
#[async_trait]
pub trait StreamingServer: Send + Sync {
    async fn get_virtual_folders(&self) -> anyhow::Result<Vec<VirtualFolder>>;

    /// Every item of one library, paginated internally.
    async fn list_items(&self, library: &str) -> anyhow::Result<Vec<StreamingItem>>;

    async fn delete_item(&self, id: &str) -> anyhow::Result<()>;

    /// Destroy a series respecting the cleanup mode: delete episodes outside
    /// the keep set, then any season left empty.
    async fn delete_series(&self, id: &str, mode: CleanupMode, keep_count: u32)
        -> anyhow::Result<()>;

    async fn find_collection_by_name(&self, name: &str) -> anyhow::Result<Option<CollectionRef>>;
    async fn create_collection(&self, name: &str, ids: &[String]) -> anyhow::Result<CollectionRef>;
    async fn add_to_collection(&self, collection_id: &str, ids: &[String]) -> anyhow::Result<()>;
    async fn remove_from_collection(
        &self,
        collection_id: &str,
        ids: &[String],
    ) -> anyhow::Result<()>;
    async fn collection_items(&self, collection_id: &str) -> anyhow::Result<Vec<String>>;

    fn invalidate_cache(&self);
}

/// Playback statistics service.
#[async_trait]
pub trait PlaybackStats: Send + Sync {
    async fn last_played(&self, streaming_id: &str) -> anyhow::Result<LastPlayed>;
}

/// The "I'd like to watch X" request service.
#[async_trait]
pub trait RequestDirectory: Send + Sync {
    async fn get_request(
        &self,
        tmdb_id: i64,
        media_type: MediaType,
    ) -> anyhow::Result<Option<RequestInfo>>;
}

/// Linear-channel schedule service.
#[async_trait]
pub trait ChannelGuide: Send + Sync {
    /// Streaming ids currently scheduled: movie item ids plus show ids for
    /// any scheduled episode.
    async fn scheduled_ids(&self) -> anyhow::Result<HashSet<String>>;
}

/// Every upstream the engine talks to, behind the capability seams.
#[derive(Clone)]
pub struct Upstreams {
    pub movie_indexer: Arc<dyn Indexer>,
    pub series_indexer: Arc<dyn Indexer>,
    pub streaming: Arc<dyn StreamingServer>,
    pub stats: Arc<dyn PlaybackStats>,
    pub requests: Option<Arc<dyn RequestDirectory>>,
    pub channels: Option<Arc<dyn ChannelGuide>>,
}

impl Upstreams {
    pub fn indexer_for(&self, media_type: MediaType) -> &Arc<dyn Indexer> {
        match media_type {
            MediaType::Movie => &self.movie_indexer,
            MediaType::Tv => &self.series_indexer,
        }
    }

    pub fn invalidate_caches(&self) {
        self.movie_indexer.invalidate_cache();
        self.series_indexer.invalidate_cache();
        self.streaming.invalidate_cache();
    }
}

/// Episode key within a series.
pub type EpisodeKey = (i64, i64);

#[derive(Debug, Clone, Copy)]
pub struct EpisodeMeta {
    pub season: i64,
    pub episode: i64,
    pub air_date: Option<DateTime<Utc>>,
}

/// Which episodes to destroy and which to unmonitor for a series under the
/// given cleanup mode. Season 0 (specials) is always preserved. The
/// unmonitor set only covers episodes that already aired; under
/// `keep_seasons`, seasons containing a not-yet-aired episode are skipped
/// for the unmonitor step only.
pub fn plan_series_cleanup(
    episodes: &[EpisodeMeta],
    mode: CleanupMode,
    keep_count: u32,
    now: DateTime<Utc>,
) -> (HashSet<EpisodeKey>, HashSet<EpisodeKey>) {
    let mut regular: Vec<&EpisodeMeta> =
        episodes.iter().filter(|e| e.season != 0).collect();
    regular.sort_by_key(|e| (e.season, e.episode));

    let mut delete: HashSet<EpisodeKey> = HashSet::new();
    let mut unmonitor: HashSet<EpisodeKey> = HashSet::new();
    let aired = |e: &EpisodeMeta| e.air_date.map(|d| d <= now).unwrap_or(false);

    match mode {
        CleanupMode::All => {
            for e in &regular {
                delete.insert((e.season, e.episode));
                if aired(e) {
                    unmonitor.insert((e.season, e.episode));
                }
            }
        }
        CleanupMode::KeepEpisodes => {
            for e in regular.iter().skip(keep_count as usize) {
                delete.insert((e.season, e.episode));
                if aired(e) {
                    unmonitor.insert((e.season, e.episode));
                }
            }
        }
        CleanupMode::KeepSeasons => {
            let mut seasons: Vec<i64> = regular.iter().map(|e| e.season).collect();
            seasons.sort_unstable();
            seasons.dedup();
            let kept: HashSet<i64> = seasons.into_iter().take(keep_count as usize).collect();
            let unaired_seasons: HashSet<i64> = regular
                .iter()
                .filter(|e| !aired(e))
                .map(|e| e.season)
                .collect();
            for e in &regular {
                if kept.contains(&e.season) {
                    continue;
                }
                delete.insert((e.season, e.episode));
                if !unaired_seasons.contains(&e.season) {
                    unmonitor.insert((e.season, e.episode));
                }
            }
        }
    }

    (delete, unmonitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ep(season: i64, episode: i64, aired_days_ago: Option<i64>) -> EpisodeMeta {
        EpisodeMeta {
            season,
            episode,
            air_date: aired_days_ago.map(|d| Utc::now() - Duration::days(d)),
        }
    }

    #[test]
    fn keep_episodes_preserves_first_n_and_specials() {
        let eps = vec![
            ep(0, 1, Some(500)),
            ep(1, 1, Some(400)),
            ep(1, 2, Some(390)),
            ep(2, 1, Some(100)),
            ep(2, 2, None),
        ];
        let (delete, unmonitor) =
            plan_series_cleanup(&eps, CleanupMode::KeepEpisodes, 2, Utc::now());

        assert!(!delete.contains(&(0, 1)));
        assert!(!delete.contains(&(1, 1)));
        assert!(!delete.contains(&(1, 2)));
        assert!(delete.contains(&(2, 1)));
        assert!(delete.contains(&(2, 2)));
        // Only aired episodes are unmonitored.
        assert!(unmonitor.contains(&(2, 1)));
        assert!(!unmonitor.contains(&(2, 2)));
    }

    #[test]
    fn keep_seasons_skips_unaired_season_for_unmonitor_only() {
        let eps = vec![
            ep(1, 1, Some(400)),
            ep(2, 1, Some(100)),
            ep(2, 2, None), // season 2 still airing
        ];
        let (delete, unmonitor) =
            plan_series_cleanup(&eps, CleanupMode::KeepSeasons, 1, Utc::now());

        assert!(delete.contains(&(2, 1)));
        assert!(delete.contains(&(2, 2)));
        assert!(unmonitor.is_empty());
    }

    #[test]
    fn mode_all_deletes_everything_but_specials() {
        let eps = vec![ep(0, 1, Some(10)), ep(1, 1, Some(10))];
        let (delete, _) = plan_series_cleanup(&eps, CleanupMode::All, 1, Utc::now());
        assert_eq!(delete.len(), 1);
        assert!(delete.contains(&(1, 1)));
    }

    #[test]
    fn keep_target_larger_than_series_deletes_nothing() {
        let eps = vec![ep(1, 1, Some(10)), ep(1, 2, Some(9))];
        let (delete, unmonitor) =
            plan_series_cleanup(&eps, CleanupMode::KeepEpisodes, 10, Utc::now());
        assert!(delete.is_empty());
        assert!(unmonitor.is_empty());

        let (delete, _) = plan_series_cleanup(&eps, CleanupMode::KeepSeasons, 2, Utc::now());
        assert!(delete.is_empty());
    }
}
