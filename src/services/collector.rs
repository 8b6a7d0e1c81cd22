use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::clients::{IndexerItem, Upstreams};
use crate::config::Config;
use crate::models::{Candidate, MediaType};

/// Everything one collection pass learned from the upstreams.
pub struct CollectOutput {
    pub candidates: Vec<Candidate>,
    /// Library name to absolute folder paths, for the disk-usage policy.
    pub library_folders: HashMap<String, Vec<PathBuf>>,
    /// Every streaming id seen in the fresh inventory, matched or not.
    pub streaming_ids: HashSet<String>,
    /// Libraries that listed successfully this pass.
    pub listed_libraries: HashSet<String>,
}

/// Merges the streaming server's inventory with both indexer catalogs into a
/// unified candidate list.
pub struct Collector {
    upstreams: Upstreams,
    config: Arc<Config>,
}

impl Collector {
    pub fn new(upstreams: Upstreams, config: Arc<Config>) -> Self {
        Self { upstreams, config }
    }

    pub async fn collect(&self) -> anyhow::Result<CollectOutput> {
        let folders = self.upstreams.streaming.get_virtual_folders().await?;
        let mut library_folders: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for folder in &folders {
            if self
                .config
                .library(&folder.name)
                .map(|lib| lib.enabled)
                .unwrap_or(false)
            {
                library_folders.insert(folder.name.clone(), folder.paths.clone());
            }
        }

        let movies = self.upstreams.movie_indexer.get_all().await?;
        let series = self.upstreams.series_indexer.get_all().await?;
        let movies_by_tmdb: HashMap<i64, &IndexerItem> = movies
            .iter()
            .filter_map(|m| m.tmdb_id.map(|id| (id, m)))
            .collect();
        let series_by_tvdb: HashMap<i64, &IndexerItem> = series
            .iter()
            .filter_map(|s| s.tvdb_id.map(|id| (id, s)))
            .collect();
        let series_by_tmdb: HashMap<i64, &IndexerItem> = series
            .iter()
            .filter_map(|s| s.tmdb_id.map(|id| (id, s)))
            .collect();

        let mut candidates = Vec::new();
        let mut streaming_ids = HashSet::new();
        let mut listed_libraries = HashSet::new();
        let enabled: Vec<&String> = self
            .config
            .libraries
            .iter()
            .filter(|(_, lib)| lib.enabled)
            .map(|(name, _)| name)
            .collect();

        for library in &enabled {
            let items = match self.upstreams.streaming.list_items(library).await {
                Ok(items) => items,
                Err(e) => {
                    warn!("listing library '{library}' failed, skipping: {e}");
                    continue;
                }
            };
            listed_libraries.insert(library.to_string());

            for item in items {
                streaming_ids.insert(item.id.clone());
                let matched = match item.media_type {
                    MediaType::Movie => item.tmdb_id.and_then(|id| movies_by_tmdb.get(&id)),
                    MediaType::Tv => item
                        .tvdb_id
                        .and_then(|id| series_by_tvdb.get(&id))
                        .or_else(|| item.tmdb_id.and_then(|id| series_by_tmdb.get(&id))),
                };
                let Some(indexed) = matched else {
                    warn!(
                        "'{}' ({}) has no matching indexer item, dropped",
                        item.name, item.id
                    );
                    continue;
                };
                candidates.push(Candidate {
                    media_type: item.media_type,
                    arr_id: indexed.arr_id,
                    streaming_id: item.id,
                    library_name: library.to_string(),
                    title: indexed.title.clone(),
                    year: indexed.year,
                    tmdb_id: indexed.tmdb_id,
                    tvdb_id: indexed.tvdb_id,
                    file_size_bytes: indexed.size_on_disk,
                    poster_url: indexed.poster_url.clone(),
                    tags: indexed.tags.clone(),
                    added_at: indexed.added,
                    requested_by: String::new(),
                    seasons: indexed.seasons.clone(),
                });
            }
        }

        if !enabled.is_empty() && listed_libraries.is_empty() {
            anyhow::bail!("no library could be listed");
        }
        info!(
            "collected {} candidate(s) from {} library(ies)",
            candidates.len(),
            listed_libraries.len()
        );

        Ok(CollectOutput {
            candidates,
            library_folders,
            streaming_ids,
            listed_libraries,
        })
    }
}
