use std::collections::HashSet;
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::clients::StreamingServer;
use crate::config::Config;
use crate::db::media::MediaStore;
use crate::models::MediaType;

/// Keeps the id lists per request short enough for URL-borne set calls.
const BATCH_SIZE: usize = 50;

/// Maintains the "leaving soon" view-collections on the streaming server:
/// one per media type, mirroring the unprotected rows in the store.
pub struct CollectionMaintainer {
    pool: SqlitePool,
    streaming: Arc<dyn StreamingServer>,
    config: Arc<Config>,
}

impl CollectionMaintainer {
    pub fn new(pool: SqlitePool, streaming: Arc<dyn StreamingServer>, config: Arc<Config>) -> Self {
        Self { pool, streaming, config }
    }

    pub async fn sync(&self) -> anyhow::Result<()> {
        let pairs = [
            (MediaType::Movie, self.config.leaving_collections_movie_name.as_str()),
            (MediaType::Tv, self.config.leaving_collections_tv_name.as_str()),
        ];
        for (media_type, name) in pairs {
            self.reconcile(media_type, name).await?;
        }
        Ok(())
    }

    async fn reconcile(&self, media_type: MediaType, name: &str) -> anyhow::Result<()> {
        let desired: HashSet<String> = MediaStore::list(&self.pool, false)
            .await?
            .into_iter()
            .filter(|m| m.media_type() == media_type)
            .map(|m| m.streaming_id)
            .collect();

        let Some(collection) = self.streaming.find_collection_by_name(name).await? else {
            if desired.is_empty() {
                return Ok(());
            }
            let ids: Vec<String> = desired.into_iter().collect();
            let mut chunks = ids.chunks(BATCH_SIZE);
            let first: Vec<String> = chunks.next().unwrap_or_default().to_vec();
            let created = self.streaming.create_collection(name, &first).await?;
            for chunk in chunks {
                self.streaming.add_to_collection(&created.id, chunk).await?;
            }
            info!("collection '{name}' created with {} item(s)", ids.len());
            return Ok(());
        };

        let existing: HashSet<String> = self
            .streaming
            .collection_items(&collection.id)
            .await?
            .into_iter()
            .collect();

        let to_add: Vec<String> = desired.difference(&existing).cloned().collect();
        let to_remove: Vec<String> = existing.difference(&desired).cloned().collect();
        for chunk in to_add.chunks(BATCH_SIZE) {
            self.streaming.add_to_collection(&collection.id, chunk).await?;
        }
        for chunk in to_remove.chunks(BATCH_SIZE) {
            self.streaming.remove_from_collection(&collection.id, chunk).await?;
        }
        if !to_add.is_empty() || !to_remove.is_empty() {
            info!(
                "collection '{name}' reconciled: +{} -{}",
                to_add.len(),
                to_remove.len()
            );
        }
        Ok(())
    }
}
