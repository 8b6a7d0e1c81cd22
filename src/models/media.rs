use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    Tv,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", match self { MediaType::Movie => "movie", MediaType::Tv => "tv" })
    }
}

impl std::str::FromStr for MediaType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            _ => Err(anyhow::anyhow!("Unknown media_type: {s}")),
        }
    }
}

/// Why a media row left the active set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeleteReason {
    /// Deleted by the policy engine.
    Default,
    /// Played recently, no longer a candidate.
    Streamed,
    /// Vanished from the streaming server between runs.
    Missing,
    ProtectionExpired,
    KeepForever,
}

impl std::fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeleteReason::Default => "default",
            DeleteReason::Streamed => "streamed",
            DeleteReason::Missing => "missing",
            DeleteReason::ProtectionExpired => "protection_expired",
            DeleteReason::KeepForever => "keep_forever",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DeleteReason {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(DeleteReason::Default),
            "streamed" => Ok(DeleteReason::Streamed),
            "missing" => Ok(DeleteReason::Missing),
            "protection_expired" => Ok(DeleteReason::ProtectionExpired),
            "keep_forever" => Ok(DeleteReason::KeepForever),
            _ => Err(anyhow::anyhow!("Unknown delete reason: {s}")),
        }
    }
}

/// DB row struct — media_type is stored as TEXT, parse via [`MediaType`]
/// when a typed value is needed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Media {
    pub id: i64,
    pub arr_id: i64,
    pub streaming_id: String,
    pub media_type: String,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub library_name: String,
    pub title: String,
    pub year: Option<i64>,
    pub file_size_bytes: i64,
    pub poster_url: Option<String>,
    pub requested_by: String,
    pub default_delete_at: DateTime<Utc>,
    pub estimated_delete_at: Option<DateTime<Utc>>,
    pub protected_until: Option<DateTime<Utc>>,
    pub unkeepable: bool,
    pub db_delete_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Media {
    pub fn media_type(&self) -> MediaType {
        self.media_type.parse().unwrap_or(MediaType::Movie)
    }

    /// True while an approved keep request (or operator protection) is in effect.
    pub fn is_protected(&self, now: DateTime<Utc>) -> bool {
        self.protected_until.map(|p| p > now).unwrap_or(false)
    }
}

/// Insert payload for a freshly picked-up candidate. Policy `apply` fills the
/// lifecycle fields before the row hits the database.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub arr_id: i64,
    pub streaming_id: String,
    pub media_type: MediaType,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub library_name: String,
    pub title: String,
    pub year: Option<i64>,
    pub file_size_bytes: i64,
    pub poster_url: Option<String>,
    pub requested_by: String,
    pub default_delete_at: DateTime<Utc>,
    pub estimated_delete_at: Option<DateTime<Utc>>,
    /// Disk-usage schedules attached by the disk-usage policy.
    pub disk_usage_rows: Vec<NewDiskUsageRow>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewDiskUsageRow {
    pub threshold_percent: f64,
    pub delete_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DiskUsagePolicyRow {
    pub id: i64,
    pub media_id: i64,
    pub threshold_percent: f64,
    pub delete_date: DateTime<Utc>,
}
