use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::clients::Upstreams;
use crate::config::Config;
use crate::db::history::HistoryStore;
use crate::db::media::MediaStore;
use crate::db::requests::RequestStore;
use crate::db::users::UserStore;
use crate::models::{EventType, MediaType, NewMedia};

/// Prefix of every tag the engine ever wrote to an indexer.
pub const TAG_PREFIX: &str = "sweeparr-";

/// Long-lived marker: the item is permanently off-limits for cleanup.
pub const IGNORE_TAG: &str = "sweeparr-ignore";

/// The predecessor encoded per-item lifecycle state in indexer tags. Parsed
/// once, on the first run ever, to reconstruct database rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyTag {
    /// `sweeparr-delete-2024-03-01`: scheduled deletion date.
    Delete(NaiveDate),
    /// `sweeparr-keep-2024-06-01`: protected until date.
    Keep(NaiveDate),
    /// `sweeparr-keep-request-<username>`: a pending keep request.
    KeepRequest(String),
    /// `sweeparr-must-delete`: operator denied keeping.
    MustDelete,
    Ignore,
}

pub fn parse_legacy_tag(label: &str) -> Option<LegacyTag> {
    let rest = label.strip_prefix(TAG_PREFIX)?;
    if rest == "ignore" {
        return Some(LegacyTag::Ignore);
    }
    if rest == "must-delete" {
        return Some(LegacyTag::MustDelete);
    }
    if let Some(date) = rest.strip_prefix("delete-") {
        return date.parse().ok().map(LegacyTag::Delete);
    }
    if let Some(requester) = rest.strip_prefix("keep-request-") {
        if requester.is_empty() {
            return None;
        }
        return Some(LegacyTag::KeepRequest(requester.to_string()));
    }
    if let Some(date) = rest.strip_prefix("keep-") {
        return date.parse().ok().map(LegacyTag::Keep);
    }
    None
}

/// Lifecycle state reconstructed from one item's tag set.
#[derive(Debug, Default, Clone)]
pub struct LegacyState {
    pub delete_at: Option<DateTime<Utc>>,
    pub protected_until: Option<DateTime<Utc>>,
    pub requesters: Vec<String>,
    pub unkeepable: bool,
    pub ignored: bool,
}

pub fn legacy_state(tags: &[String]) -> LegacyState {
    let mut state = LegacyState::default();
    for tag in tags {
        match parse_legacy_tag(tag) {
            Some(LegacyTag::Delete(date)) => {
                state.delete_at = Some(midnight(date));
            }
            Some(LegacyTag::Keep(date)) => {
                state.protected_until = Some(midnight(date));
            }
            Some(LegacyTag::KeepRequest(user)) => state.requesters.push(user),
            Some(LegacyTag::MustDelete) => state.unkeepable = true,
            Some(LegacyTag::Ignore) => state.ignored = true,
            None => {}
        }
    }
    state
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .expect("valid midnight")
        .and_utc()
}

/// One-shot migration: rebuild Media/request rows from legacy tags as if the
/// engine had produced them, then strip the legacy tags from both indexers.
/// The ignore marker survives — the tags filter keeps honoring it.
pub async fn migrate(pool: &SqlitePool, upstreams: &Upstreams, config: &Config) -> anyhow::Result<()> {
    info!("first run: migrating legacy indexer tags");

    // Streaming id + library by external id, needed to rebuild full rows.
    let mut by_tmdb: HashMap<i64, (String, String)> = HashMap::new();
    let mut by_tvdb: HashMap<i64, (String, String)> = HashMap::new();
    for (name, lib) in &config.libraries {
        if !lib.enabled {
            continue;
        }
        let items = match upstreams.streaming.list_items(name).await {
            Ok(items) => items,
            Err(e) => {
                warn!("legacy migration: listing library '{name}' failed: {e}");
                continue;
            }
        };
        for item in items {
            if let Some(tmdb) = item.tmdb_id {
                by_tmdb.insert(tmdb, (item.id.clone(), name.clone()));
            }
            if let Some(tvdb) = item.tvdb_id {
                by_tvdb.insert(tvdb, (item.id.clone(), name.clone()));
            }
        }
    }

    let mut migrated = 0usize;
    for media_type in [MediaType::Movie, MediaType::Tv] {
        let indexer = upstreams.indexer_for(media_type);
        let items = indexer.get_all().await?;
        for item in items {
            let state = legacy_state(&item.tags);
            let Some(delete_at) = state.delete_at else {
                continue; // never picked up by the predecessor
            };
            if state.ignored {
                continue;
            }
            let matched = item
                .tmdb_id
                .and_then(|id| by_tmdb.get(&id))
                .or_else(|| item.tvdb_id.and_then(|id| by_tvdb.get(&id)))
                .cloned();
            let Some((streaming_id, library_name)) = matched else {
                warn!("legacy migration: no streaming item for '{}', skipping", item.title);
                continue;
            };

            let inserted = MediaStore::create_many(
                pool,
                &[NewMedia {
                    arr_id: item.arr_id,
                    streaming_id,
                    media_type,
                    tmdb_id: item.tmdb_id,
                    tvdb_id: item.tvdb_id,
                    library_name,
                    title: item.title.clone(),
                    year: item.year,
                    file_size_bytes: item.size_on_disk,
                    poster_url: item.poster_url.clone(),
                    requested_by: String::new(),
                    default_delete_at: delete_at,
                    estimated_delete_at: Some(delete_at),
                    disk_usage_rows: vec![],
                }],
            )
            .await?;
            let Some(media) = inserted.first() else { continue };

            HistoryStore::create_event(pool, media.id, EventType::PickedUp, None).await?;
            if let Some(until) = state.protected_until {
                MediaStore::set_protected_until(pool, media.id, Some(until)).await?;
            }
            if state.unkeepable {
                MediaStore::mark_unkeepable(pool, media.id).await?;
            }
            for requester in &state.requesters {
                let user = UserStore::get_or_create(pool, requester).await?;
                if let Err(e) = RequestStore::create(pool, media.id, user.id).await {
                    warn!("legacy migration: request for '{requester}' not recreated: {e}");
                }
            }
            migrated += 1;
        }
    }

    upstreams.movie_indexer.reset_tags(&[]).await?;
    upstreams.series_indexer.reset_tags(&[]).await?;
    info!("legacy migration done, {migrated} item(s) restored");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_legacy_vocabulary() {
        assert_eq!(
            parse_legacy_tag("sweeparr-delete-2024-03-01"),
            Some(LegacyTag::Delete("2024-03-01".parse().unwrap()))
        );
        assert_eq!(
            parse_legacy_tag("sweeparr-keep-2024-06-15"),
            Some(LegacyTag::Keep("2024-06-15".parse().unwrap()))
        );
        assert_eq!(
            parse_legacy_tag("sweeparr-keep-request-alice"),
            Some(LegacyTag::KeepRequest("alice".into()))
        );
        assert_eq!(parse_legacy_tag("sweeparr-must-delete"), Some(LegacyTag::MustDelete));
        assert_eq!(parse_legacy_tag("sweeparr-ignore"), Some(LegacyTag::Ignore));
    }

    #[test]
    fn foreign_and_malformed_tags_are_ignored() {
        assert_eq!(parse_legacy_tag("favorite"), None);
        assert_eq!(parse_legacy_tag("sweeparr-delete-notadate"), None);
        assert_eq!(parse_legacy_tag("sweeparr-keep-request-"), None);
        assert_eq!(parse_legacy_tag("sweeparr-unknown"), None);
    }

    #[test]
    fn state_combines_all_tags_of_an_item() {
        let tags = vec![
            "sweeparr-delete-2024-03-01".to_string(),
            "sweeparr-keep-request-alice".to_string(),
            "sweeparr-keep-request-bob".to_string(),
            "hdr".to_string(),
        ];
        let state = legacy_state(&tags);
        assert!(state.delete_at.is_some());
        assert_eq!(state.requesters, vec!["alice", "bob"]);
        assert!(!state.unkeepable);
        assert!(!state.ignored);
    }
}
