use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::media::MediaType;

/// Per-season episode counts as reported by the series indexer. Season 0
/// holds specials and is never counted as a regular season.
#[derive(Debug, Clone, Serialize)]
pub struct SeasonStats {
    pub season_number: i64,
    pub episode_file_count: i64,
}

/// A media item returned by the collector, before filtering. Everything the
/// filter chain and the policy engine need travels with the candidate so the
/// filters stay free of extra upstream calls.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub media_type: MediaType,
    pub arr_id: i64,
    pub streaming_id: String,
    pub library_name: String,
    pub title: String,
    pub year: Option<i64>,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub file_size_bytes: i64,
    pub poster_url: Option<String>,
    /// Indexer tag labels attached to the item.
    pub tags: Vec<String>,
    /// Import date at the indexer, when known.
    pub added_at: Option<DateTime<Utc>>,
    /// Requester identity from the request service; empty when unknown.
    pub requested_by: String,
    /// Season statistics, series only.
    pub seasons: Vec<SeasonStats>,
}

impl Candidate {
    /// Episodes on disk outside season 0.
    pub fn regular_episode_count(&self) -> i64 {
        self.seasons
            .iter()
            .filter(|s| s.season_number != 0)
            .map(|s| s.episode_file_count)
            .sum()
    }

    /// Seasons outside season 0 that have at least one episode on disk.
    pub fn regular_season_count(&self) -> i64 {
        self.seasons
            .iter()
            .filter(|s| s.season_number != 0 && s.episode_file_count > 0)
            .count() as i64
    }
}
