use sqlx::SqlitePool;

use crate::models::{EventType, HistoryEvent};

/// Optional constraints for [`HistoryStore::list_events`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HistoryFilter {
    pub media_id: Option<i64>,
    pub event_type: Option<EventType>,
}

pub struct HistoryStore;

impl HistoryStore {
    pub async fn create_event(
        pool: &SqlitePool,
        media_id: i64,
        event_type: EventType,
        user_id: Option<i64>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO history_events (media_id, event_type, user_id, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(media_id)
        .bind(event_type.to_string())
        .bind(user_id)
        .bind(chrono::Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_events(
        pool: &SqlitePool,
        filter: HistoryFilter,
    ) -> anyhow::Result<Vec<HistoryEvent>> {
        let events = sqlx::query_as::<_, HistoryEvent>(
            "SELECT * FROM history_events \
             WHERE ($1 IS NULL OR media_id = $1) \
               AND ($2 IS NULL OR event_type = $2) \
             ORDER BY created_at, id",
        )
        .bind(filter.media_id)
        .bind(filter.event_type.map(|e| e.to_string()))
        .fetch_all(pool)
        .await?;
        Ok(events)
    }

    /// Events for every media row (live or soft-deleted) that ever carried
    /// this streaming id.
    pub async fn list_events_by_streaming_id(
        pool: &SqlitePool,
        streaming_id: &str,
    ) -> anyhow::Result<Vec<HistoryEvent>> {
        let events = sqlx::query_as::<_, HistoryEvent>(
            "SELECT h.* FROM history_events h \
             JOIN media m ON m.id = h.media_id \
             WHERE m.streaming_id = $1 \
             ORDER BY h.created_at, h.id",
        )
        .bind(streaming_id)
        .fetch_all(pool)
        .await?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::media::MediaStore;
    use crate::db::test_pool;
    use crate::models::{DeleteReason, MediaType, NewMedia};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn events_survive_media_soft_delete() {
        let pool = test_pool().await;
        let media = MediaStore::create_many(
            &pool,
            &[NewMedia {
                arr_id: 9,
                streaming_id: "stream-9".into(),
                media_type: MediaType::Movie,
                tmdb_id: None,
                tvdb_id: None,
                library_name: "Movies".into(),
                title: "Movie".into(),
                year: None,
                file_size_bytes: 0,
                poster_url: None,
                requested_by: String::new(),
                default_delete_at: Utc::now() + Duration::days(30),
                estimated_delete_at: None,
                disk_usage_rows: vec![],
            }],
        )
        .await
        .unwrap();
        let id = media[0].id;

        HistoryStore::create_event(&pool, id, EventType::PickedUp, None).await.unwrap();
        MediaStore::soft_delete(&pool, id, DeleteReason::Default).await.unwrap();
        HistoryStore::create_event(&pool, id, EventType::Deleted, None).await.unwrap();

        let events = HistoryStore::list_events_by_streaming_id(&pool, "stream-9")
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "picked_up");
        assert_eq!(events[1].event_type, "deleted");

        let only_deleted = HistoryStore::list_events(
            &pool,
            HistoryFilter { media_id: Some(id), event_type: Some(EventType::Deleted) },
        )
        .await
        .unwrap();
        assert_eq!(only_deleted.len(), 1);
    }
}
