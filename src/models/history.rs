use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Append-only audit trail of lifecycle decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PickedUp,
    Protected,
    Unprotected,
    ProtectionExpired,
    Deleted,
    Streamed,
    NotFoundAnymore,
    RequestCreated,
    RequestApproved,
    RequestDenied,
    KeepForever,
    AdminKeep,
    AdminUnkeep,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::PickedUp => "picked_up",
            EventType::Protected => "protected",
            EventType::Unprotected => "unprotected",
            EventType::ProtectionExpired => "protection_expired",
            EventType::Deleted => "deleted",
            EventType::Streamed => "streamed",
            EventType::NotFoundAnymore => "not_found_anymore",
            EventType::RequestCreated => "request_created",
            EventType::RequestApproved => "request_approved",
            EventType::RequestDenied => "request_denied",
            EventType::KeepForever => "keep_forever",
            EventType::AdminKeep => "admin_keep",
            EventType::AdminUnkeep => "admin_unkeep",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EventType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "picked_up" => Ok(EventType::PickedUp),
            "protected" => Ok(EventType::Protected),
            "unprotected" => Ok(EventType::Unprotected),
            "protection_expired" => Ok(EventType::ProtectionExpired),
            "deleted" => Ok(EventType::Deleted),
            "streamed" => Ok(EventType::Streamed),
            "not_found_anymore" => Ok(EventType::NotFoundAnymore),
            "request_created" => Ok(EventType::RequestCreated),
            "request_approved" => Ok(EventType::RequestApproved),
            "request_denied" => Ok(EventType::RequestDenied),
            "keep_forever" => Ok(EventType::KeepForever),
            "admin_keep" => Ok(EventType::AdminKeep),
            "admin_unkeep" => Ok(EventType::AdminUnkeep),
            _ => Err(anyhow::anyhow!("Unknown event type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HistoryEvent {
    pub id: i64,
    pub media_id: i64,
    pub event_type: String,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}
