use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool};

use crate::models::{DeleteReason, DiskUsagePolicyRow, Media, MediaType, NewMedia};

pub struct MediaStore;

impl MediaStore {
    /// Bulk insert-or-skip against the uniqueness tuple
    /// (arr_id, streaming_id, media_type, default_delete_at).
    /// Returns the rows that were actually inserted; conflicting candidates
    /// are silently skipped.
    pub async fn create_many(pool: &SqlitePool, items: &[NewMedia]) -> anyhow::Result<Vec<Media>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let mut qb: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO media \
             (arr_id, streaming_id, media_type, tmdb_id, tvdb_id, library_name, title, year, \
              file_size_bytes, poster_url, requested_by, default_delete_at, estimated_delete_at, \
              created_at, updated_at) ",
        );
        qb.push_values(items, |mut b, item| {
            b.push_bind(item.arr_id)
                .push_bind(&item.streaming_id)
                .push_bind(item.media_type.to_string())
                .push_bind(item.tmdb_id)
                .push_bind(item.tvdb_id)
                .push_bind(&item.library_name)
                .push_bind(&item.title)
                .push_bind(item.year)
                .push_bind(item.file_size_bytes)
                .push_bind(&item.poster_url)
                .push_bind(&item.requested_by)
                .push_bind(item.default_delete_at)
                .push_bind(item.estimated_delete_at)
                .push_bind(now)
                .push_bind(now);
        });
        qb.push(" RETURNING *");

        let inserted: Vec<Media> = qb.build_query_as().fetch_all(&mut *tx).await?;

        // Attach the disk-usage schedules the policy engine computed for each
        // inserted row. Skipped conflicts keep their existing schedules.
        for media in &inserted {
            let Some(item) = items.iter().find(|i| {
                i.arr_id == media.arr_id
                    && i.streaming_id == media.streaming_id
                    && i.media_type.to_string() == media.media_type
            }) else {
                continue;
            };
            for row in &item.disk_usage_rows {
                sqlx::query(
                    "INSERT INTO disk_usage_policies (media_id, threshold_percent, delete_date) \
                     VALUES ($1, $2, $3)",
                )
                .bind(media.id)
                .bind(row.threshold_percent)
                .bind(row.delete_date)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> anyhow::Result<Option<Media>> {
        let media = sqlx::query_as::<_, Media>(
            "SELECT * FROM media WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(media)
    }

    /// Live rows. Without `include_protected`, rows under an active
    /// protection window are hidden (the "candidates" view).
    pub async fn list(pool: &SqlitePool, include_protected: bool) -> anyhow::Result<Vec<Media>> {
        let media = if include_protected {
            sqlx::query_as::<_, Media>(
                "SELECT * FROM media WHERE deleted_at IS NULL ORDER BY title",
            )
            .fetch_all(pool)
            .await?
        } else {
            sqlx::query_as::<_, Media>(
                "SELECT * FROM media \
                 WHERE deleted_at IS NULL \
                   AND (protected_until IS NULL OR protected_until <= $1) \
                 ORDER BY title",
            )
            .bind(Utc::now())
            .fetch_all(pool)
            .await?
        };
        Ok(media)
    }

    pub async fn list_by_type(
        pool: &SqlitePool,
        media_type: MediaType,
    ) -> anyhow::Result<Vec<Media>> {
        let media = sqlx::query_as::<_, Media>(
            "SELECT * FROM media WHERE deleted_at IS NULL AND media_type = $1 ORDER BY title",
        )
        .bind(media_type.to_string())
        .fetch_all(pool)
        .await?;
        Ok(media)
    }

    /// Live rows with at least one pending keep request.
    pub async fn list_pending_request(pool: &SqlitePool) -> anyhow::Result<Vec<Media>> {
        let media = sqlx::query_as::<_, Media>(
            "SELECT DISTINCT m.* FROM media m \
             JOIN requests r ON r.media_id = m.id \
             WHERE m.deleted_at IS NULL AND r.status = 'pending' \
             ORDER BY m.title",
        )
        .fetch_all(pool)
        .await?;
        Ok(media)
    }

    pub async fn list_expired_protection(
        pool: &SqlitePool,
        as_of: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Media>> {
        let media = sqlx::query_as::<_, Media>(
            "SELECT * FROM media \
             WHERE deleted_at IS NULL AND protected_until IS NOT NULL AND protected_until <= $1",
        )
        .bind(as_of)
        .fetch_all(pool)
        .await?;
        Ok(media)
    }

    /// Soft-deleted rows sharing a TMDB id, most recent deletion first. Used
    /// by the age filter to reset the clock on re-imports.
    pub async fn list_deleted_by_tmdb(pool: &SqlitePool, tmdb_id: i64) -> anyhow::Result<Vec<Media>> {
        let media = sqlx::query_as::<_, Media>(
            "SELECT * FROM media \
             WHERE deleted_at IS NOT NULL AND tmdb_id = $1 \
             ORDER BY deleted_at DESC",
        )
        .bind(tmdb_id)
        .fetch_all(pool)
        .await?;
        Ok(media)
    }

    pub async fn list_deleted_by_tvdb(pool: &SqlitePool, tvdb_id: i64) -> anyhow::Result<Vec<Media>> {
        let media = sqlx::query_as::<_, Media>(
            "SELECT * FROM media \
             WHERE deleted_at IS NOT NULL AND tvdb_id = $1 \
             ORDER BY deleted_at DESC",
        )
        .bind(tvdb_id)
        .fetch_all(pool)
        .await?;
        Ok(media)
    }

    pub async fn set_protected_until(
        pool: &SqlitePool,
        media_id: i64,
        protected_until: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE media SET protected_until = $1, updated_at = $2 WHERE id = $3")
            .bind(protected_until)
            .bind(Utc::now())
            .bind(media_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Flags the row non-keepable. Clears any protection window — the two
    /// states are mutually exclusive.
    pub async fn mark_unkeepable(pool: &SqlitePool, media_id: i64) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE media SET unkeepable = TRUE, protected_until = NULL, updated_at = $1 \
             WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(media_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Lifts the non-keepable flag again (operator protection).
    pub async fn clear_unkeepable(pool: &SqlitePool, media_id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE media SET unkeepable = FALSE, updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(media_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_estimated_delete_at(
        pool: &SqlitePool,
        media_id: i64,
        estimated: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE media SET estimated_delete_at = $1, updated_at = $2 WHERE id = $3")
            .bind(estimated)
            .bind(Utc::now())
            .bind(media_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Records the reason and removes the row from the active set. The row
    /// stays queryable through the deleted-by-external-id lookups. Pending
    /// requests on the row become `unavailable`.
    pub async fn soft_delete(
        pool: &SqlitePool,
        media_id: i64,
        reason: DeleteReason,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;
        sqlx::query(
            "UPDATE media SET db_delete_reason = $1, deleted_at = $2, updated_at = $2 \
             WHERE id = $3 AND deleted_at IS NULL",
        )
        .bind(reason.to_string())
        .bind(now)
        .bind(media_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE requests SET status = 'unavailable', updated_at = $1 \
             WHERE media_id = $2 AND status = 'pending'",
        )
        .bind(now)
        .bind(media_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn disk_usage_rows(
        pool: &SqlitePool,
        media_id: i64,
    ) -> anyhow::Result<Vec<DiskUsagePolicyRow>> {
        let rows = sqlx::query_as::<_, DiskUsagePolicyRow>(
            "SELECT * FROM disk_usage_policies WHERE media_id = $1 ORDER BY delete_date",
        )
        .bind(media_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use chrono::Duration;

    pub(crate) fn new_media(arr_id: i64, title: &str) -> NewMedia {
        NewMedia {
            arr_id,
            streaming_id: format!("stream-{arr_id}"),
            media_type: MediaType::Movie,
            tmdb_id: Some(1000 + arr_id),
            tvdb_id: None,
            library_name: "Movies".into(),
            title: title.into(),
            year: Some(2020),
            file_size_bytes: 10 * 1024 * 1024 * 1024,
            poster_url: None,
            requested_by: String::new(),
            default_delete_at: Utc::now() + Duration::days(30),
            estimated_delete_at: None,
            disk_usage_rows: vec![],
        }
    }

    #[tokio::test]
    async fn create_many_skips_conflicts() {
        let pool = test_pool().await;
        let item = new_media(1, "Movie A");
        let first = MediaStore::create_many(&pool, &[item.clone()]).await.unwrap();
        assert_eq!(first.len(), 1);

        // Same uniqueness tuple again: skipped, nothing inserted.
        let second = MediaStore::create_many(&pool, &[item]).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(MediaStore::list(&pool, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_many_attaches_disk_usage_rows() {
        let pool = test_pool().await;
        let mut item = new_media(2, "Movie B");
        item.disk_usage_rows = vec![crate::models::NewDiskUsageRow {
            threshold_percent: 90.0,
            delete_date: Utc::now() + Duration::days(3),
        }];
        let inserted = MediaStore::create_many(&pool, &[item]).await.unwrap();
        let rows = MediaStore::disk_usage_rows(&pool, inserted[0].id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].threshold_percent, 90.0);
    }

    #[tokio::test]
    async fn protected_rows_hidden_from_candidates_view() {
        let pool = test_pool().await;
        let inserted = MediaStore::create_many(&pool, &[new_media(3, "Movie C")])
            .await
            .unwrap();
        MediaStore::set_protected_until(
            &pool,
            inserted[0].id,
            Some(Utc::now() + Duration::days(7)),
        )
        .await
        .unwrap();

        assert!(MediaStore::list(&pool, false).await.unwrap().is_empty());
        assert_eq!(MediaStore::list(&pool, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn soft_delete_keeps_external_id_lookup() {
        let pool = test_pool().await;
        let inserted = MediaStore::create_many(&pool, &[new_media(4, "Movie D")])
            .await
            .unwrap();
        MediaStore::soft_delete(&pool, inserted[0].id, DeleteReason::Streamed)
            .await
            .unwrap();

        assert!(MediaStore::list(&pool, true).await.unwrap().is_empty());
        let deleted = MediaStore::list_deleted_by_tmdb(&pool, 1004).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].db_delete_reason.as_deref(), Some("streamed"));
    }

    #[tokio::test]
    async fn unkeepable_clears_protection() {
        let pool = test_pool().await;
        let inserted = MediaStore::create_many(&pool, &[new_media(5, "Movie E")])
            .await
            .unwrap();
        MediaStore::set_protected_until(
            &pool,
            inserted[0].id,
            Some(Utc::now() + Duration::days(7)),
        )
        .await
        .unwrap();
        MediaStore::mark_unkeepable(&pool, inserted[0].id).await.unwrap();

        let media = MediaStore::get_by_id(&pool, inserted[0].id).await.unwrap().unwrap();
        assert!(media.unkeepable);
        assert!(media.protected_until.is_none());
    }

    #[tokio::test]
    async fn expired_protection_listing() {
        let pool = test_pool().await;
        let inserted = MediaStore::create_many(
            &pool,
            &[new_media(6, "Movie F"), new_media(7, "Movie G")],
        )
        .await
        .unwrap();
        MediaStore::set_protected_until(
            &pool,
            inserted[0].id,
            Some(Utc::now() - Duration::hours(1)),
        )
        .await
        .unwrap();
        MediaStore::set_protected_until(
            &pool,
            inserted[1].id,
            Some(Utc::now() + Duration::hours(1)),
        )
        .await
        .unwrap();

        let expired = MediaStore::list_expired_protection(&pool, Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, inserted[0].id);
    }
}
