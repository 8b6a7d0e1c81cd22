use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::clients::{LastPlayed, Upstreams};
use crate::config::{CleanupMode, Config};
use crate::db::media::MediaStore;
use crate::models::{Candidate, MediaType};
use crate::services::legacy::IGNORE_TAG;

/// One predicate in the chain. Returns the same-or-smaller list.
#[async_trait]
pub trait CandidateFilter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, candidates: Vec<Candidate>) -> anyhow::Result<Vec<Candidate>>;
}

/// Ordered filter chain. The ordering is load-bearing: the database check
/// runs first, then the constant-time predicates, remote lookups last.
pub struct FilterChain {
    filters: Vec<Box<dyn CandidateFilter>>,
}

impl FilterChain {
    pub fn build(pool: SqlitePool, upstreams: Upstreams, config: Arc<Config>) -> Self {
        let mut filters: Vec<Box<dyn CandidateFilter>> = vec![
            Box::new(DbFilter { pool: pool.clone() }),
            Box::new(SeriesFilter {
                mode: config.cleanup_mode,
                keep_count: config.keep_count,
            }),
            Box::new(TagsFilter { config: config.clone() }),
            Box::new(SizeFilter { config: config.clone() }),
            Box::new(AgeFilter {
                pool,
                upstreams: upstreams.clone(),
                config: config.clone(),
            }),
            Box::new(StreamFilter {
                upstreams: upstreams.clone(),
                config: config.clone(),
            }),
        ];
        if let Some(channels) = upstreams.channels.clone() {
            let opted_in = config
                .libraries
                .values()
                .any(|lib| lib.enabled && lib.filter.channel_filter_enabled);
            if opted_in {
                filters.push(Box::new(ChannelFilter { channels, config }));
            }
        }
        Self { filters }
    }

    /// Runs every filter in order; short-circuits on the first error.
    pub async fn run(&self, mut candidates: Vec<Candidate>) -> anyhow::Result<Vec<Candidate>> {
        for filter in &self.filters {
            let before = candidates.len();
            candidates = filter.apply(candidates).await?;
            debug!("filter {}: {} -> {}", filter.name(), before, candidates.len());
        }
        Ok(candidates)
    }
}

/// Excludes candidates already persisted as live rows.
pub struct DbFilter {
    pub pool: SqlitePool,
}

#[async_trait]
impl CandidateFilter for DbFilter {
    fn name(&self) -> &'static str {
        "db"
    }

    async fn apply(&self, candidates: Vec<Candidate>) -> anyhow::Result<Vec<Candidate>> {
        let known: HashSet<(i64, String)> = MediaStore::list(&self.pool, true)
            .await?
            .into_iter()
            .map(|m| (m.arr_id, m.media_type))
            .collect();
        Ok(candidates
            .into_iter()
            .filter(|c| !known.contains(&(c.arr_id, c.media_type.to_string())))
            .collect())
    }
}

/// Under a keep-N cleanup mode, series already at or below the keep target
/// have nothing left to destroy.
pub struct SeriesFilter {
    pub mode: CleanupMode,
    pub keep_count: u32,
}

#[async_trait]
impl CandidateFilter for SeriesFilter {
    fn name(&self) -> &'static str {
        "series"
    }

    async fn apply(&self, candidates: Vec<Candidate>) -> anyhow::Result<Vec<Candidate>> {
        let keep = self.keep_count as i64;
        Ok(candidates
            .into_iter()
            .filter(|c| {
                if c.media_type != MediaType::Tv {
                    return true;
                }
                match self.mode {
                    CleanupMode::All => true,
                    CleanupMode::KeepEpisodes => c.regular_episode_count() > keep,
                    CleanupMode::KeepSeasons => c.regular_season_count() > keep,
                }
            })
            .collect())
    }
}

/// Excludes items carrying the permanent-ignore marker or a tag the library
/// lists under `exclude_tags`.
pub struct TagsFilter {
    pub config: Arc<Config>,
}

#[async_trait]
impl CandidateFilter for TagsFilter {
    fn name(&self) -> &'static str {
        "tags"
    }

    async fn apply(&self, candidates: Vec<Candidate>) -> anyhow::Result<Vec<Candidate>> {
        Ok(candidates
            .into_iter()
            .filter(|c| {
                if c.tags.iter().any(|t| t == IGNORE_TAG) {
                    return false;
                }
                let excluded = self
                    .config
                    .library(&c.library_name)
                    .map(|lib| lib.filter.exclude_tags.as_slice())
                    .unwrap_or_default();
                !c.tags.iter().any(|t| excluded.contains(t))
            })
            .collect())
    }
}

/// Excludes items below the library's size threshold. A threshold of zero is
/// a no-op.
pub struct SizeFilter {
    pub config: Arc<Config>,
}

#[async_trait]
impl CandidateFilter for SizeFilter {
    fn name(&self) -> &'static str {
        "size"
    }

    async fn apply(&self, candidates: Vec<Candidate>) -> anyhow::Result<Vec<Candidate>> {
        Ok(candidates
            .into_iter()
            .filter(|c| {
                let threshold = self
                    .config
                    .library(&c.library_name)
                    .map(|lib| lib.filter.content_size_threshold_bytes)
                    .unwrap_or(0);
                c.file_size_bytes >= threshold
            })
            .collect())
    }
}

/// Excludes items imported more recently than the library's age threshold.
/// For re-imported content the most recent prior deletion recorded in the
/// store bounds the lookup, so the clock restarts at the re-import.
pub struct AgeFilter {
    pub pool: SqlitePool,
    pub upstreams: Upstreams,
    pub config: Arc<Config>,
}

#[async_trait]
impl CandidateFilter for AgeFilter {
    fn name(&self) -> &'static str {
        "age"
    }

    async fn apply(&self, candidates: Vec<Candidate>) -> anyhow::Result<Vec<Candidate>> {
        let now = Utc::now();
        let mut kept = Vec::with_capacity(candidates.len());
        for c in candidates {
            let threshold = self
                .config
                .library(&c.library_name)
                .map(|lib| lib.filter.content_age_threshold_days)
                .unwrap_or(0);

            let prior_deletion = match c.media_type {
                MediaType::Movie => match c.tmdb_id {
                    Some(id) => MediaStore::list_deleted_by_tmdb(&self.pool, id).await?,
                    None => Vec::new(),
                },
                MediaType::Tv => match c.tvdb_id {
                    Some(id) => MediaStore::list_deleted_by_tvdb(&self.pool, id).await?,
                    None => Vec::new(),
                },
            }
            .first()
            .and_then(|m| m.deleted_at);

            let reference = if prior_deletion.is_some() {
                let indexer = self.upstreams.indexer_for(c.media_type);
                match indexer.get_added_date(c.arr_id, prior_deletion).await {
                    Ok(at) => at,
                    Err(e) => {
                        warn!("age filter: import date of '{}' unavailable: {e}", c.title);
                        None
                    }
                }
            } else {
                c.added_at
            };

            // Unknown age is treated as too young.
            let Some(reference) = reference else { continue };
            if now - reference > Duration::days(threshold) {
                kept.push(c);
            }
        }
        Ok(kept)
    }
}

/// Excludes items played within the library's last-stream threshold. Items
/// the stats service has never seen are excluded conservatively.
pub struct StreamFilter {
    pub upstreams: Upstreams,
    pub config: Arc<Config>,
}

#[async_trait]
impl CandidateFilter for StreamFilter {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn apply(&self, candidates: Vec<Candidate>) -> anyhow::Result<Vec<Candidate>> {
        let now = Utc::now();
        let mut kept = Vec::with_capacity(candidates.len());
        for c in candidates {
            let threshold = self
                .config
                .library(&c.library_name)
                .map(|lib| lib.filter.last_stream_threshold_days)
                .unwrap_or(0);
            match self.upstreams.stats.last_played(&c.streaming_id).await {
                Ok(LastPlayed::Never) => kept.push(c),
                Ok(LastPlayed::Unknown) => {
                    debug!("stream filter: '{}' unknown to stats service, excluded", c.title);
                }
                Ok(LastPlayed::At(at)) => {
                    if now - at > Duration::days(threshold) {
                        kept.push(c);
                    }
                }
                Err(e) => {
                    warn!("stream filter: stats lookup for '{}' failed: {e}", c.title);
                }
            }
        }
        Ok(kept)
    }
}

/// Excludes items scheduled on a linear channel, for libraries that opted in.
pub struct ChannelFilter {
    pub channels: Arc<dyn crate::clients::ChannelGuide>,
    pub config: Arc<Config>,
}

#[async_trait]
impl CandidateFilter for ChannelFilter {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn apply(&self, candidates: Vec<Candidate>) -> anyhow::Result<Vec<Candidate>> {
        let scheduled = self.channels.scheduled_ids().await?;
        Ok(candidates
            .into_iter()
            .filter(|c| {
                let enabled = self
                    .config
                    .library(&c.library_name)
                    .map(|lib| lib.filter.channel_filter_enabled)
                    .unwrap_or(false);
                !(enabled && scheduled.contains(&c.streaming_id))
            })
            .collect())
    }
}
