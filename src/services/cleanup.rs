use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime};

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clients::{LastPlayed, Upstreams};
use crate::config::Config;
use crate::db::history::HistoryStore;
use crate::db::media::MediaStore;
use crate::models::{DeleteReason, EventType, MediaType, NewMedia};
use crate::services::collections::CollectionMaintainer;
use crate::services::collector::Collector;
use crate::services::filters::FilterChain;
use crate::services::legacy;
use crate::services::metrics;
use crate::services::notify::NotifyService;
use crate::services::policy::{PolicyEngine, PolicyInput, UsageProbe};

/// Orchestrates one complete cleanup pass. The scheduler guarantees a single
/// active run; this type only sequences the steps.
pub struct CleanupService {
    pool: SqlitePool,
    config: Arc<Config>,
    upstreams: Upstreams,
    notify: Arc<NotifyService>,
    probe: Arc<dyn UsageProbe>,
    /// Armed when the database file did not exist at startup.
    legacy_pending: AtomicBool,
}

impl CleanupService {
    pub fn new(
        pool: SqlitePool,
        config: Arc<Config>,
        upstreams: Upstreams,
        notify: Arc<NotifyService>,
        probe: Arc<dyn UsageProbe>,
        first_run: bool,
    ) -> Self {
        Self {
            pool,
            config,
            upstreams,
            notify,
            probe,
            legacy_pending: AtomicBool::new(first_run),
        }
    }

    fn ensure_live(token: &CancellationToken) -> anyhow::Result<()> {
        if token.is_cancelled() {
            anyhow::bail!("cleanup run cancelled");
        }
        Ok(())
    }

    pub async fn run(&self, token: CancellationToken) -> anyhow::Result<()> {
        let now = Utc::now();
        info!("cleanup run starting{}", if self.config.dry_run { " (dry run)" } else { "" });

        // 1. Fresh upstream views for the whole pass.
        self.upstreams.invalidate_caches();

        // 2. One-time legacy migration.
        if self.legacy_pending.load(Ordering::SeqCst) {
            legacy::migrate(&self.pool, &self.upstreams, &self.config).await?;
            self.legacy_pending.store(false, Ordering::SeqCst);
        }
        Self::ensure_live(&token)?;

        // 3. Expire lapsed protections.
        for media in MediaStore::list_expired_protection(&self.pool, now).await? {
            MediaStore::soft_delete(&self.pool, media.id, DeleteReason::ProtectionExpired).await?;
            HistoryStore::create_event(&self.pool, media.id, EventType::ProtectionExpired, None)
                .await?;
            metrics::MEDIA_REMOVED.with_label_values(&["protection_expired"]).inc();
            info!("protection of '{}' expired", media.title);
        }
        Self::ensure_live(&token)?;

        // 4. Collect & correlate.
        let collected = Collector::new(self.upstreams.clone(), self.config.clone())
            .collect()
            .await?;
        let engine = PolicyEngine::new(collected.library_folders.clone(), self.probe.clone());
        Self::ensure_live(&token)?;

        // 5. Reap rows that vanished from the streaming server. Libraries
        // that failed to list are left alone rather than mass-reaped.
        for media in MediaStore::list(&self.pool, true).await? {
            if collected.listed_libraries.contains(&media.library_name)
                && !collected.streaming_ids.contains(&media.streaming_id)
            {
                MediaStore::soft_delete(&self.pool, media.id, DeleteReason::Missing).await?;
                HistoryStore::create_event(&self.pool, media.id, EventType::NotFoundAnymore, None)
                    .await?;
                metrics::MEDIA_REMOVED.with_label_values(&["missing"]).inc();
                info!("'{}' no longer on the streaming server", media.title);
            }
        }
        Self::ensure_live(&token)?;

        // 6. Mark new candidates.
        let chain = FilterChain::build(self.pool.clone(), self.upstreams.clone(), self.config.clone());
        let survivors = chain.run(collected.candidates).await?;
        let mut payloads: Vec<NewMedia> = Vec::with_capacity(survivors.len());
        for candidate in survivors {
            let Some(library) = self.config.library(&candidate.library_name) else {
                continue;
            };
            let mut requested_by = String::new();
            if let (Some(requests), Some(tmdb_id)) = (&self.upstreams.requests, candidate.tmdb_id) {
                match requests.get_request(tmdb_id, candidate.media_type).await {
                    Ok(Some(request)) => requested_by = request.requested_by,
                    Ok(None) => {}
                    Err(e) => warn!("requester of '{}' unknown: {e}", candidate.title),
                }
            }
            let mut payload = NewMedia {
                arr_id: candidate.arr_id,
                streaming_id: candidate.streaming_id,
                media_type: candidate.media_type,
                tmdb_id: candidate.tmdb_id,
                tvdb_id: candidate.tvdb_id,
                library_name: candidate.library_name.clone(),
                title: candidate.title,
                year: candidate.year,
                file_size_bytes: candidate.file_size_bytes,
                poster_url: candidate.poster_url,
                requested_by,
                default_delete_at: now,
                estimated_delete_at: None,
                disk_usage_rows: vec![],
            };
            engine.apply_all(&mut payload, library, now);
            payloads.push(payload);
        }
        let inserted = MediaStore::create_many(&self.pool, &payloads).await?;
        for media in &inserted {
            HistoryStore::create_event(&self.pool, media.id, EventType::PickedUp, None).await?;
            metrics::MEDIA_PICKED_UP.inc();
        }
        if !inserted.is_empty() {
            info!("{} new candidate(s) picked up", inserted.len());
            self.notify.cleanup_summaries(&self.pool, &inserted).await;
        }
        Self::ensure_live(&token)?;

        // 7. Reap recently streamed items, protected ones included.
        for media in MediaStore::list(&self.pool, true).await? {
            let Some(library) = self.config.library(&media.library_name) else {
                continue;
            };
            let threshold = Duration::days(library.filter.last_stream_threshold_days);
            match self.upstreams.stats.last_played(&media.streaming_id).await {
                Ok(LastPlayed::At(at)) if now - at <= threshold => {
                    MediaStore::soft_delete(&self.pool, media.id, DeleteReason::Streamed).await?;
                    HistoryStore::create_event(&self.pool, media.id, EventType::Streamed, None)
                        .await?;
                    metrics::MEDIA_REMOVED.with_label_values(&["streamed"]).inc();
                    info!("'{}' was played recently, dropped from the queue", media.title);
                }
                Ok(_) => {}
                Err(e) => warn!("stats lookup for '{}' failed: {e}", media.title),
            }
        }
        Self::ensure_live(&token)?;

        // 8. Delete due items.
        for media in MediaStore::list(&self.pool, false).await? {
            Self::ensure_live(&token)?;
            let rows = MediaStore::disk_usage_rows(&self.pool, media.id).await?;
            let input = PolicyInput::for_media(&media, &rows);
            if !engine.should_trigger(&input, now) {
                continue;
            }
            if self.config.dry_run {
                info!("dry run: would delete '{}'", media.title);
                continue;
            }

            let indexer = self.upstreams.indexer_for(media.media_type());
            if let Err(e) = indexer.delete(media.arr_id).await {
                warn!("indexer deletion of '{}' failed, skipping: {e}", media.title);
                continue;
            }
            let streaming_result = match media.media_type() {
                MediaType::Movie => self.upstreams.streaming.delete_item(&media.streaming_id).await,
                MediaType::Tv => {
                    self.upstreams
                        .streaming
                        .delete_series(
                            &media.streaming_id,
                            self.config.cleanup_mode,
                            self.config.keep_count,
                        )
                        .await
                }
            };
            // The indexer is authoritative; a streaming-server failure does
            // not undo the deletion.
            if let Err(e) = streaming_result {
                warn!("streaming deletion of '{}' failed: {e}", media.title);
            }
            MediaStore::soft_delete(&self.pool, media.id, DeleteReason::Default).await?;
            HistoryStore::create_event(&self.pool, media.id, EventType::Deleted, None).await?;
            metrics::MEDIA_REMOVED.with_label_values(&["default"]).inc();
            info!("'{}' deleted", media.title);
        }
        Self::ensure_live(&token)?;

        // 9. Refresh deletion estimates.
        for media in MediaStore::list(&self.pool, true).await? {
            let rows = MediaStore::disk_usage_rows(&self.pool, media.id).await?;
            let estimated = engine.estimated_delete_at(&PolicyInput::for_media(&media, &rows));
            MediaStore::set_estimated_delete_at(&self.pool, media.id, estimated).await?;
        }
        Self::ensure_live(&token)?;

        // 10. Leaving-soon collections.
        if self.config.enable_leaving_collections {
            let maintainer = CollectionMaintainer::new(
                self.pool.clone(),
                self.upstreams.streaming.clone(),
                self.config.clone(),
            );
            if let Err(e) = maintainer.sync().await {
                warn!("leaving-soon collections not reconciled: {e}");
            }
        }

        info!("cleanup run finished");
        Ok(())
    }
}

/// Weekly maintenance: drop cached images older than the retention window.
pub async fn clear_image_cache(path: &Path) -> anyhow::Result<usize> {
    const MAX_AGE: StdDuration = StdDuration::from_secs(7 * 24 * 3600);

    let mut removed = 0usize;
    let mut entries = tokio::fs::read_dir(path).await?;
    let cutoff = SystemTime::now() - MAX_AGE;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if modified < cutoff {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!("image cache: {} not removed: {e}", entry.path().display());
            } else {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::history::{HistoryFilter, HistoryStore};
    use crate::db::test_pool;
    use crate::models::Media;
    use crate::services::testkit::{
        fakes, indexer_movie, streaming_movie, test_config, FixedProbe, UpstreamFakes,
    };
    use chrono::DateTime;

    fn wire_one_movie(fakes: &mut UpstreamFakes) {
        let streaming = Arc::get_mut(&mut fakes.streaming).unwrap();
        streaming.folders = vec![
            crate::clients::VirtualFolder {
                name: "Movies".into(),
                paths: vec!["/data/movies".into()],
            },
            crate::clients::VirtualFolder { name: "TV".into(), paths: vec!["/data/tv".into()] },
        ];
        streaming
            .items
            .insert("Movies".into(), vec![streaming_movie("m1", "Movies", 100)]);
        *fakes.movie_indexer.items.lock().unwrap() = vec![indexer_movie(1, 100, "Movie A")];
    }

    fn service(
        pool: &SqlitePool,
        fakes: &UpstreamFakes,
        config: Config,
        usage: f64,
        first_run: bool,
    ) -> CleanupService {
        CleanupService::new(
            pool.clone(),
            Arc::new(config),
            fakes.upstreams(),
            Arc::new(NotifyService::new(None, None, None)),
            Arc::new(FixedProbe(usage)),
            first_run,
        )
    }

    async fn backdate_default(pool: &SqlitePool, media_id: i64, to: DateTime<Utc>) {
        sqlx::query("UPDATE media SET default_delete_at = $1 WHERE id = $2")
            .bind(to)
            .bind(media_id)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn only_live(pool: &SqlitePool) -> Vec<Media> {
        MediaStore::list(pool, true).await.unwrap()
    }

    #[tokio::test]
    async fn baseline_pickup_then_delete() {
        let pool = test_pool().await;
        let mut fakes = fakes();
        wire_one_movie(&mut fakes);
        let svc = service(&pool, &fakes, test_config(), 50.0, false);

        // First pass: the movie is picked up with the 30-day schedule.
        svc.run(CancellationToken::new()).await.unwrap();
        let live = only_live(&pool).await;
        assert_eq!(live.len(), 1);
        let media = &live[0];
        let expected = Utc::now() + Duration::days(30);
        assert!((media.default_delete_at - expected).num_seconds().abs() < 5);
        assert_eq!(media.estimated_delete_at, Some(media.default_delete_at));
        let events = HistoryStore::list_events(
            &pool,
            HistoryFilter { media_id: Some(media.id), event_type: Some(EventType::PickedUp) },
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 1);

        // Second pass, past the schedule: deleted everywhere.
        backdate_default(&pool, media.id, Utc::now() - Duration::days(1)).await;
        svc.run(CancellationToken::new()).await.unwrap();

        assert_eq!(*fakes.movie_indexer.deleted.lock().unwrap(), vec![1]);
        assert!(fakes.streaming.deleted.lock().unwrap().contains(&"m1".to_string()));
        assert!(only_live(&pool).await.is_empty());
        let deleted = MediaStore::list_deleted_by_tmdb(&pool, 100).await.unwrap();
        assert_eq!(deleted[0].db_delete_reason.as_deref(), Some("default"));
        let events = HistoryStore::list_events(
            &pool,
            HistoryFilter { media_id: Some(media.id), event_type: Some(EventType::Deleted) },
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn recently_played_is_reaped_before_deletion() {
        let pool = test_pool().await;
        let mut fakes = fakes();
        wire_one_movie(&mut fakes);
        let svc = service(&pool, &fakes, test_config(), 50.0, false);

        svc.run(CancellationToken::new()).await.unwrap();
        let media_id = only_live(&pool).await[0].id;
        backdate_default(&pool, media_id, Utc::now() - Duration::days(1)).await;

        // Played two days ago, inside the 30-day stream threshold.
        fakes.stats.set("m1", LastPlayed::At(Utc::now() - Duration::days(2)));
        svc.run(CancellationToken::new()).await.unwrap();

        // Reaped as streamed in step 7; the indexer never saw a deletion.
        assert!(fakes.movie_indexer.deleted.lock().unwrap().is_empty());
        let deleted = MediaStore::list_deleted_by_tmdb(&pool, 100).await.unwrap();
        assert_eq!(deleted[0].db_delete_reason.as_deref(), Some("streamed"));
    }

    #[tokio::test]
    async fn protection_blocks_deletion() {
        let pool = test_pool().await;
        let mut fakes = fakes();
        wire_one_movie(&mut fakes);
        let svc = service(&pool, &fakes, test_config(), 50.0, false);

        svc.run(CancellationToken::new()).await.unwrap();
        let media_id = only_live(&pool).await[0].id;
        backdate_default(&pool, media_id, Utc::now() - Duration::days(1)).await;
        MediaStore::set_protected_until(&pool, media_id, Some(Utc::now() + Duration::days(90)))
            .await
            .unwrap();

        svc.run(CancellationToken::new()).await.unwrap();
        assert!(fakes.movie_indexer.deleted.lock().unwrap().is_empty());
        assert_eq!(only_live(&pool).await.len(), 1);
    }

    #[tokio::test]
    async fn disk_pressure_deletes_before_the_default_schedule() {
        let pool = test_pool().await;
        let mut fakes = fakes();
        wire_one_movie(&mut fakes);
        let mut config = test_config();
        config
            .libraries
            .get_mut("Movies")
            .unwrap()
            .disk_usage_thresholds = vec![crate::config::DiskUsageThreshold {
            usage_percent: 90.0,
            max_cleanup_delay_days: 3,
        }];
        let svc = service(&pool, &fakes, config, 92.0, false);

        svc.run(CancellationToken::new()).await.unwrap();
        let media = &only_live(&pool).await[0];
        let rows = MediaStore::disk_usage_rows(&pool, media.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        // With 92% usage the estimate tracks the pressure schedule.
        assert_eq!(media.estimated_delete_at, Some(rows[0].delete_date));

        // Four days later: the pressure row is due, the default is not.
        sqlx::query("UPDATE disk_usage_policies SET delete_date = $1 WHERE media_id = $2")
            .bind(Utc::now() - Duration::days(1))
            .bind(media.id)
            .execute(&pool)
            .await
            .unwrap();
        svc.run(CancellationToken::new()).await.unwrap();

        assert_eq!(*fakes.movie_indexer.deleted.lock().unwrap(), vec![1]);
        let deleted = MediaStore::list_deleted_by_tmdb(&pool, 100).await.unwrap();
        assert_eq!(deleted[0].db_delete_reason.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn vanished_rows_are_reaped_only_for_listed_libraries() {
        let pool = test_pool().await;
        let mut fakes = fakes();
        wire_one_movie(&mut fakes);
        let svc = service(&pool, &fakes, test_config(), 50.0, false);
        svc.run(CancellationToken::new()).await.unwrap();
        let count_before = only_live(&pool).await.len();
        drop(svc);

        // The item disappears from the inventory.
        Arc::get_mut(&mut fakes.streaming)
            .map(|s| s.items.insert("Movies".into(), vec![]))
            .unwrap();
        let svc = service(&pool, &fakes, test_config(), 50.0, false);
        svc.run(CancellationToken::new()).await.unwrap();

        assert_eq!(only_live(&pool).await.len(), count_before - 1);
        let deleted = MediaStore::list_deleted_by_tmdb(&pool, 100).await.unwrap();
        assert_eq!(deleted[0].db_delete_reason.as_deref(), Some("missing"));
        let events = HistoryStore::list_events(
            &pool,
            HistoryFilter { media_id: None, event_type: Some(EventType::NotFoundAnymore) },
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn failing_library_is_not_mass_reaped() {
        let pool = test_pool().await;
        let mut fakes = fakes();
        wire_one_movie(&mut fakes);
        let svc = service(&pool, &fakes, test_config(), 50.0, false);
        svc.run(CancellationToken::new()).await.unwrap();
        assert_eq!(only_live(&pool).await.len(), 1);
        drop(svc);

        // The whole library fails to list; its rows must survive.
        Arc::get_mut(&mut fakes.streaming)
            .map(|s| s.failing.insert("Movies".into()))
            .unwrap();
        let svc = service(&pool, &fakes, test_config(), 50.0, false);
        svc.run(CancellationToken::new()).await.unwrap();
        assert_eq!(only_live(&pool).await.len(), 1);
    }

    #[tokio::test]
    async fn zero_candidates_leaves_the_store_untouched() {
        let pool = test_pool().await;
        let mut fakes = fakes();
        let streaming = Arc::get_mut(&mut fakes.streaming).unwrap();
        streaming.folders = vec![crate::clients::VirtualFolder {
            name: "Movies".into(),
            paths: vec!["/data/movies".into()],
        }];
        let svc = service(&pool, &fakes, test_config(), 50.0, false);

        svc.run(CancellationToken::new()).await.unwrap();
        assert!(only_live(&pool).await.is_empty());
        let events = HistoryStore::list_events(&pool, HistoryFilter::default()).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn dry_run_logs_instead_of_deleting() {
        let pool = test_pool().await;
        let mut fakes = fakes();
        wire_one_movie(&mut fakes);
        let svc = service(&pool, &fakes, test_config(), 50.0, false);
        svc.run(CancellationToken::new()).await.unwrap();
        let media_id = only_live(&pool).await[0].id;
        backdate_default(&pool, media_id, Utc::now() - Duration::days(1)).await;

        let mut config = test_config();
        config.dry_run = true;
        let svc = service(&pool, &fakes, config, 50.0, false);
        svc.run(CancellationToken::new()).await.unwrap();

        assert!(fakes.movie_indexer.deleted.lock().unwrap().is_empty());
        assert!(fakes.streaming.deleted.lock().unwrap().is_empty());
        assert_eq!(only_live(&pool).await.len(), 1);
    }

    #[tokio::test]
    async fn first_run_migrates_legacy_tags() {
        let pool = test_pool().await;
        let mut fakes = fakes();
        wire_one_movie(&mut fakes);
        fakes.movie_indexer.items.lock().unwrap()[0].tags = vec![
            "sweeparr-delete-2099-03-01".to_string(),
            "sweeparr-keep-request-alice".to_string(),
        ];
        let svc = service(&pool, &fakes, test_config(), 50.0, true);

        svc.run(CancellationToken::new()).await.unwrap();

        let live = only_live(&pool).await;
        assert_eq!(live.len(), 1);
        assert_eq!(
            live[0].default_delete_at,
            "2099-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        let user = crate::db::users::UserStore::get_by_username(&pool, "alice")
            .await
            .unwrap()
            .expect("requester restored");
        assert!(crate::db::requests::RequestStore::get_pending(&pool, live[0].id, user.id)
            .await
            .unwrap()
            .is_some());
        assert_eq!(fakes.movie_indexer.tags_reset_with.lock().unwrap().len(), 1);
        assert_eq!(fakes.series_indexer.tags_reset_with.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_run() {
        let pool = test_pool().await;
        let mut fakes = fakes();
        wire_one_movie(&mut fakes);
        let svc = service(&pool, &fakes, test_config(), 50.0, false);

        let token = CancellationToken::new();
        token.cancel();
        assert!(svc.run(token).await.is_err());
        assert!(only_live(&pool).await.is_empty());
    }
}
