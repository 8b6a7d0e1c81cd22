use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::clients::Upstreams;
use crate::config::Config;
use crate::db::history::HistoryStore;
use crate::db::media::MediaStore;
use crate::db::requests::RequestStore;
use crate::db::users::UserStore;
use crate::error::EngineError;
use crate::models::{DeleteReason, EventType, Media, RequestStatus, User};
use crate::services::metrics;
use crate::services::notify::NotifyService;

/// Keep-request lifecycle and operator overrides.
pub struct KeepService {
    pool: SqlitePool,
    config: Arc<Config>,
    upstreams: Upstreams,
    notify: Arc<NotifyService>,
}

impl KeepService {
    pub fn new(
        pool: SqlitePool,
        config: Arc<Config>,
        upstreams: Upstreams,
        notify: Arc<NotifyService>,
    ) -> Self {
        Self { pool, config, upstreams, notify }
    }

    fn protection_period_days(&self, library: &str) -> i64 {
        self.config
            .library(library)
            .map(|lib| lib.protection_period_days)
            .unwrap_or(90)
    }

    async fn media(&self, media_id: i64) -> anyhow::Result<Media> {
        MediaStore::get_by_id(&self.pool, media_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("media").into())
    }

    /// Files a keep request. Returns whether it was auto-approved.
    pub async fn request_keep(&self, username: &str, media_id: i64) -> anyhow::Result<bool> {
        let media = self.media(media_id).await?;
        if media.unkeepable {
            return Err(EngineError::Unkeepable.into());
        }
        let user = UserStore::get_or_create(&self.pool, username).await?;
        if RequestStore::get_pending(&self.pool, media.id, user.id)
            .await?
            .is_some()
        {
            return Err(EngineError::AlreadyProcessed.into());
        }

        RequestStore::create(&self.pool, media.id, user.id).await?;
        HistoryStore::create_event(&self.pool, media.id, EventType::RequestCreated, Some(user.id))
            .await?;
        metrics::KEEP_REQUESTS.with_label_values(&["created"]).inc();

        if user.auto_approve {
            self.approve(&media, &user).await?;
            info!("keep request by '{username}' for '{}' auto-approved", media.title);
            return Ok(true);
        }

        self.notify.pending_keep_request(username, &media.title).await;
        Ok(false)
    }

    /// Operator decision on a user's pending request.
    pub async fn decide(&self, user_id: i64, media_id: i64, accept: bool) -> anyhow::Result<()> {
        let media = self.media(media_id).await?;
        let user = UserStore::get_by_id(&self.pool, user_id)
            .await?
            .ok_or(EngineError::NotFound("user"))?;
        if RequestStore::get_pending(&self.pool, media.id, user.id)
            .await?
            .is_none()
        {
            return Err(EngineError::NotFound("request").into());
        }

        if accept {
            self.approve(&media, &user).await?;
        } else {
            self.deny(&media, &user).await?;
        }
        self.notify.keep_decision(&user.username).await;
        Ok(())
    }

    async fn approve(&self, media: &Media, user: &User) -> anyhow::Result<()> {
        if let Some(request) = RequestStore::get_pending(&self.pool, media.id, user.id).await? {
            RequestStore::update_status(&self.pool, request.id, RequestStatus::Approved).await?;
        }
        let until = Utc::now() + Duration::days(self.protection_period_days(&media.library_name));
        MediaStore::set_protected_until(&self.pool, media.id, Some(until)).await?;
        HistoryStore::create_event(&self.pool, media.id, EventType::RequestApproved, Some(user.id))
            .await?;
        HistoryStore::create_event(&self.pool, media.id, EventType::Protected, Some(user.id))
            .await?;
        metrics::KEEP_REQUESTS.with_label_values(&["approved"]).inc();
        Ok(())
    }

    async fn deny(&self, media: &Media, user: &User) -> anyhow::Result<()> {
        if let Some(request) = RequestStore::get_pending(&self.pool, media.id, user.id).await? {
            RequestStore::update_status(&self.pool, request.id, RequestStatus::Denied).await?;
        }
        MediaStore::mark_unkeepable(&self.pool, media.id).await?;
        HistoryStore::create_event(&self.pool, media.id, EventType::RequestDenied, Some(user.id))
            .await?;
        metrics::KEEP_REQUESTS.with_label_values(&["denied"]).inc();
        Ok(())
    }

    /// Tags the item at its indexer with the permanent-ignore marker and
    /// retires the row. Future runs will not pick it up again.
    pub async fn force_keep_forever(&self, admin: &str, media_id: i64) -> anyhow::Result<()> {
        let media = self.media(media_id).await?;
        let indexer = self.upstreams.indexer_for(media.media_type());
        indexer.set_only_ignore_tag(media.arr_id).await?;

        MediaStore::soft_delete(&self.pool, media.id, DeleteReason::KeepForever).await?;
        let admin_user = UserStore::get_or_create(&self.pool, admin).await?;
        HistoryStore::create_event(&self.pool, media.id, EventType::KeepForever, Some(admin_user.id))
            .await?;
        metrics::MEDIA_REMOVED.with_label_values(&["keep_forever"]).inc();
        info!("'{}' kept forever by {admin}", media.title);
        Ok(())
    }

    pub async fn admin_protect(&self, admin: &str, media_id: i64) -> anyhow::Result<()> {
        let media = self.media(media_id).await?;
        MediaStore::clear_unkeepable(&self.pool, media.id).await?;
        let until = Utc::now() + Duration::days(self.protection_period_days(&media.library_name));
        MediaStore::set_protected_until(&self.pool, media.id, Some(until)).await?;
        let admin_user = UserStore::get_or_create(&self.pool, admin).await?;
        HistoryStore::create_event(&self.pool, media.id, EventType::AdminKeep, Some(admin_user.id))
            .await?;
        Ok(())
    }

    pub async fn admin_unkeep(&self, admin: &str, media_id: i64) -> anyhow::Result<()> {
        let media = self.media(media_id).await?;
        MediaStore::mark_unkeepable(&self.pool, media.id).await?;
        let admin_user = UserStore::get_or_create(&self.pool, admin).await?;
        HistoryStore::create_event(&self.pool, media.id, EventType::AdminUnkeep, Some(admin_user.id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::history::{HistoryFilter, HistoryStore};
    use crate::db::test_pool;
    use crate::models::{MediaType, NewMedia};
    use crate::services::testkit::{fakes, test_config};

    async fn service_with_media(pool: &SqlitePool) -> (KeepService, i64, crate::services::testkit::UpstreamFakes) {
        let fakes = fakes();
        let service = KeepService::new(
            pool.clone(),
            Arc::new(test_config()),
            fakes.upstreams(),
            Arc::new(NotifyService::new(None, None, None)),
        );
        let inserted = MediaStore::create_many(
            pool,
            &[NewMedia {
                arr_id: 1,
                streaming_id: "stream-1".into(),
                media_type: MediaType::Movie,
                tmdb_id: Some(42),
                tvdb_id: None,
                library_name: "Movies".into(),
                title: "Movie A".into(),
                year: Some(2020),
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
        (service, inserted[0].id, fakes)
    }

    #[tokio::test]
    async fn auto_approval_protects_immediately() {
        let pool = test_pool().await;
        let (service, media_id, _fakes) = service_with_media(&pool).await;
        let user = UserStore::create(&pool, "alice", None, true).await.unwrap();

        let auto = service.request_keep(&user.username, media_id).await.unwrap();
        assert!(auto);

        let media = MediaStore::get_by_id(&pool, media_id).await.unwrap().unwrap();
        let until = media.protected_until.expect("protected");
        let expected = Utc::now() + Duration::days(90);
        assert!((until - expected).num_seconds().abs() < 5);

        let events = HistoryStore::list_events(
            &pool,
            HistoryFilter { media_id: Some(media_id), event_type: None },
        )
        .await
        .unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(kinds, vec!["request_created", "request_approved", "protected"]);
    }

    #[tokio::test]
    async fn duplicate_request_is_already_processed() {
        let pool = test_pool().await;
        let (service, media_id, _fakes) = service_with_media(&pool).await;
        UserStore::create(&pool, "bob", None, false).await.unwrap();

        assert!(!service.request_keep("bob", media_id).await.unwrap());
        let err = service.request_keep("bob", media_id).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::AlreadyProcessed)
        ));
    }

    #[tokio::test]
    async fn denial_flags_unkeepable_and_blocks_new_requests() {
        let pool = test_pool().await;
        let (service, media_id, _fakes) = service_with_media(&pool).await;
        let user = UserStore::create(&pool, "bob", None, false).await.unwrap();

        service.request_keep("bob", media_id).await.unwrap();
        service.decide(user.id, media_id, false).await.unwrap();

        let media = MediaStore::get_by_id(&pool, media_id).await.unwrap().unwrap();
        assert!(media.unkeepable);
        assert!(media.protected_until.is_none());

        let err = service.request_keep("carol", media_id).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Unkeepable)
        ));
    }

    #[tokio::test]
    async fn second_requester_survives_first_approval() {
        let pool = test_pool().await;
        let (service, media_id, _fakes) = service_with_media(&pool).await;
        let u1 = UserStore::create(&pool, "u1", None, false).await.unwrap();
        let u2 = UserStore::create(&pool, "u2", None, false).await.unwrap();

        service.request_keep("u1", media_id).await.unwrap();
        service.request_keep("u2", media_id).await.unwrap();
        service.decide(u1.id, media_id, true).await.unwrap();

        let media = MediaStore::get_by_id(&pool, media_id).await.unwrap().unwrap();
        assert!(media.is_protected(Utc::now()));
        assert!(RequestStore::get_pending(&pool, media_id, u2.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn keep_forever_tags_and_retires_the_row() {
        let pool = test_pool().await;
        let (service, media_id, fakes) = service_with_media(&pool).await;

        service.force_keep_forever("admin", media_id).await.unwrap();

        assert_eq!(*fakes.movie_indexer.ignore_tagged.lock().unwrap(), vec![1]);
        assert!(MediaStore::get_by_id(&pool, media_id).await.unwrap().is_none());
        let deleted = MediaStore::list_deleted_by_tmdb(&pool, 42).await.unwrap();
        assert_eq!(deleted[0].db_delete_reason.as_deref(), Some("keep_forever"));
    }
}
