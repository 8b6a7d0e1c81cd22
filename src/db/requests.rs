use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{KeepRequest, RequestStatus};

pub struct RequestStore;

impl RequestStore {
    pub async fn create(
        pool: &SqlitePool,
        media_id: i64,
        user_id: i64,
    ) -> anyhow::Result<KeepRequest> {
        let now = Utc::now();
        let request = sqlx::query_as::<_, KeepRequest>(
            "INSERT INTO requests (media_id, user_id, status, created_at, updated_at) \
             VALUES ($1, $2, 'pending', $3, $3) \
             RETURNING *",
        )
        .bind(media_id)
        .bind(user_id)
        .bind(now)
        .fetch_one(pool)
        .await?;
        Ok(request)
    }

    pub async fn update_status(
        pool: &SqlitePool,
        request_id: i64,
        status: RequestStatus,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE requests SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(status.to_string())
            .bind(Utc::now())
            .bind(request_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn get_pending(
        pool: &SqlitePool,
        media_id: i64,
        user_id: i64,
    ) -> anyhow::Result<Option<KeepRequest>> {
        let request = sqlx::query_as::<_, KeepRequest>(
            "SELECT * FROM requests \
             WHERE media_id = $1 AND user_id = $2 AND status = 'pending'",
        )
        .bind(media_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(request)
    }

    pub async fn list_by_media(
        pool: &SqlitePool,
        media_id: i64,
    ) -> anyhow::Result<Vec<KeepRequest>> {
        let requests = sqlx::query_as::<_, KeepRequest>(
            "SELECT * FROM requests WHERE media_id = $1 ORDER BY created_at",
        )
        .bind(media_id)
        .fetch_all(pool)
        .await?;
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::media::MediaStore;
    use crate::db::test_pool;
    use crate::db::users::UserStore;
    use crate::models::{MediaType, NewMedia};
    use chrono::Duration;

    async fn seed(pool: &SqlitePool) -> (i64, i64) {
        let media = MediaStore::create_many(
            pool,
            &[NewMedia {
                arr_id: 1,
                streaming_id: "s1".into(),
                media_type: MediaType::Movie,
                tmdb_id: None,
                tvdb_id: None,
                library_name: "Movies".into(),
                title: "Movie A".into(),
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
        let user = UserStore::get_or_create(pool, "alice").await.unwrap();
        (media[0].id, user.id)
    }

    #[tokio::test]
    async fn one_pending_request_per_media_user() {
        let pool = test_pool().await;
        let (media_id, user_id) = seed(&pool).await;

        RequestStore::create(&pool, media_id, user_id).await.unwrap();
        // Second pending request for the same pair hits the partial unique index.
        assert!(RequestStore::create(&pool, media_id, user_id).await.is_err());
    }

    #[tokio::test]
    async fn decided_request_allows_a_new_one() {
        let pool = test_pool().await;
        let (media_id, user_id) = seed(&pool).await;

        let first = RequestStore::create(&pool, media_id, user_id).await.unwrap();
        RequestStore::update_status(&pool, first.id, RequestStatus::Denied)
            .await
            .unwrap();

        assert!(RequestStore::get_pending(&pool, media_id, user_id)
            .await
            .unwrap()
            .is_none());
        RequestStore::create(&pool, media_id, user_id).await.unwrap();
    }
}
