use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::config::LibraryConfig;
use crate::models::{DiskUsagePolicyRow, Media, NewDiskUsageRow, NewMedia};

/// Filesystem usage measurement, injectable for tests.
pub trait UsageProbe: Send + Sync {
    /// Used space of the filesystem holding `path`, in percent.
    fn usage_percent(&self, path: &Path) -> anyhow::Result<f64>;
}

/// Probe backed by statvfs.
pub struct StatvfsProbe;

impl UsageProbe for StatvfsProbe {
    fn usage_percent(&self, path: &Path) -> anyhow::Result<f64> {
        let stat = nix::sys::statvfs::statvfs(path)?;
        let total = stat.blocks() as f64;
        if total == 0.0 {
            anyhow::bail!("filesystem of {} reports zero blocks", path.display());
        }
        let available = stat.blocks_available() as f64;
        Ok((1.0 - available / total) * 100.0)
    }
}

/// A deletion schedule attached to an item, independent of whether the item
/// is still an insert payload or a persisted row.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleRow {
    pub threshold_percent: f64,
    pub delete_date: DateTime<Utc>,
}

/// The slice of an item the policies evaluate.
#[derive(Debug, Clone)]
pub struct PolicyInput {
    pub library_name: String,
    pub default_delete_at: DateTime<Utc>,
    pub protected_until: Option<DateTime<Utc>>,
    pub rows: Vec<ScheduleRow>,
}

impl PolicyInput {
    pub fn for_media(media: &Media, rows: &[DiskUsagePolicyRow]) -> Self {
        Self {
            library_name: media.library_name.clone(),
            default_delete_at: media.default_delete_at,
            protected_until: media.protected_until,
            rows: rows
                .iter()
                .map(|r| ScheduleRow {
                    threshold_percent: r.threshold_percent,
                    delete_date: r.delete_date,
                })
                .collect(),
        }
    }

    fn for_new(media: &NewMedia) -> Self {
        Self {
            library_name: media.library_name.clone(),
            default_delete_at: media.default_delete_at,
            protected_until: None,
            rows: media
                .disk_usage_rows
                .iter()
                .map(|r| ScheduleRow {
                    threshold_percent: r.threshold_percent,
                    delete_date: r.delete_date,
                })
                .collect(),
        }
    }
}

/// A deletion policy answers two independent questions: what schedule to
/// attach at pickup, and whether the item is due right now.
pub trait DeletionPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, media: &mut NewMedia, library: &LibraryConfig, now: DateTime<Utc>);
    fn should_trigger(&self, input: &PolicyInput, now: DateTime<Utc>) -> bool;
    fn estimated_delete_at(&self, input: &PolicyInput) -> Option<DateTime<Utc>>;
}

/// Baseline policy: delete after the library's cleanup delay.
pub struct DefaultDeletePolicy;

impl DeletionPolicy for DefaultDeletePolicy {
    fn name(&self) -> &'static str {
        "default_delete"
    }

    fn apply(&self, media: &mut NewMedia, library: &LibraryConfig, now: DateTime<Utc>) {
        media.default_delete_at = now + Duration::days(library.cleanup_delay_days);
    }

    fn should_trigger(&self, input: &PolicyInput, now: DateTime<Utc>) -> bool {
        now >= input.default_delete_at
    }

    fn estimated_delete_at(&self, input: &PolicyInput) -> Option<DateTime<Utc>> {
        Some(input.default_delete_at)
    }
}

/// Accelerated deletion under disk pressure: each configured threshold
/// attaches its own shorter schedule, armed only while the library's fullest
/// folder is at or above the threshold.
pub struct DiskUsageDeletePolicy {
    folders: HashMap<String, Vec<PathBuf>>,
    probe: Arc<dyn UsageProbe>,
}

impl DiskUsageDeletePolicy {
    pub fn new(folders: HashMap<String, Vec<PathBuf>>, probe: Arc<dyn UsageProbe>) -> Self {
        Self { folders, probe }
    }

    /// Highest used-percent across the library's folders. Measurement
    /// failures are non-fatal: the policy simply reports no trigger.
    fn current_usage(&self, library: &str) -> Option<f64> {
        let paths = self.folders.get(library)?;
        let mut max_usage: Option<f64> = None;
        for path in paths {
            match self.probe.usage_percent(path) {
                Ok(usage) => {
                    max_usage = Some(max_usage.map(|m: f64| m.max(usage)).unwrap_or(usage));
                }
                Err(e) => warn!("disk usage of {} unavailable: {e}", path.display()),
            }
        }
        max_usage
    }
}

impl DeletionPolicy for DiskUsageDeletePolicy {
    fn name(&self) -> &'static str {
        "disk_usage_delete"
    }

    fn apply(&self, media: &mut NewMedia, library: &LibraryConfig, now: DateTime<Utc>) {
        for threshold in &library.disk_usage_thresholds {
            media.disk_usage_rows.push(NewDiskUsageRow {
                threshold_percent: threshold.usage_percent,
                delete_date: now + Duration::days(threshold.max_cleanup_delay_days),
            });
        }
    }

    fn should_trigger(&self, input: &PolicyInput, now: DateTime<Utc>) -> bool {
        if input.rows.is_empty() {
            return false;
        }
        let Some(usage) = self.current_usage(&input.library_name) else {
            return false;
        };
        input
            .rows
            .iter()
            .any(|row| usage >= row.threshold_percent && now >= row.delete_date)
    }

    fn estimated_delete_at(&self, input: &PolicyInput) -> Option<DateTime<Utc>> {
        let usage = self.current_usage(&input.library_name)?;
        input
            .rows
            .iter()
            .filter(|row| usage >= row.threshold_percent)
            .map(|row| row.delete_date)
            .min()
    }
}

/// Ordered policy list, installed once per run with the current
/// library-folders map. Policies combine by OR; an item under active
/// protection never triggers regardless of policy outcomes.
pub struct PolicyEngine {
    policies: Vec<Box<dyn DeletionPolicy>>,
}

impl PolicyEngine {
    pub fn new(folders: HashMap<String, Vec<PathBuf>>, probe: Arc<dyn UsageProbe>) -> Self {
        Self {
            policies: vec![
                Box::new(DefaultDeletePolicy),
                Box::new(DiskUsageDeletePolicy::new(folders, probe)),
            ],
        }
    }

    /// Attach every policy's schedule to a fresh pickup and compute the
    /// initial deletion estimate.
    pub fn apply_all(&self, media: &mut NewMedia, library: &LibraryConfig, now: DateTime<Utc>) {
        for policy in &self.policies {
            policy.apply(media, library, now);
        }
        media.estimated_delete_at = self.estimated_delete_at(&PolicyInput::for_new(media));
    }

    pub fn should_trigger(&self, input: &PolicyInput, now: DateTime<Utc>) -> bool {
        if input.protected_until.map(|p| p > now).unwrap_or(false) {
            return false;
        }
        self.policies.iter().any(|p| p.should_trigger(input, now))
    }

    /// Earliest trigger time assuming current conditions.
    pub fn estimated_delete_at(&self, input: &PolicyInput) -> Option<DateTime<Utc>> {
        self.policies
            .iter()
            .filter_map(|p| p.estimated_delete_at(input))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiskUsageThreshold;
    use crate::models::MediaType;
    use crate::services::testkit::FixedProbe;

    struct FailingProbe;

    impl UsageProbe for FailingProbe {
        fn usage_percent(&self, _path: &Path) -> anyhow::Result<f64> {
            anyhow::bail!("probe offline")
        }
    }

    fn library() -> LibraryConfig {
        LibraryConfig {
            enabled: true,
            cleanup_delay_days: 30,
            protection_period_days: 90,
            filter: Default::default(),
            disk_usage_thresholds: vec![DiskUsageThreshold {
                usage_percent: 90.0,
                max_cleanup_delay_days: 3,
            }],
        }
    }

    fn folders() -> HashMap<String, Vec<PathBuf>> {
        let mut folders = HashMap::new();
        folders.insert("Movies".to_string(), vec![PathBuf::from("/data/movies")]);
        folders
    }

    fn new_media() -> NewMedia {
        NewMedia {
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
            default_delete_at: Utc::now(),
            estimated_delete_at: None,
            disk_usage_rows: vec![],
        }
    }

    fn input(media: &NewMedia, protected_until: Option<DateTime<Utc>>) -> PolicyInput {
        let mut input = PolicyInput::for_new(media);
        input.protected_until = protected_until;
        input
    }

    #[test]
    fn apply_attaches_default_and_disk_usage_schedules() {
        let now = Utc::now();
        let engine = PolicyEngine::new(folders(), Arc::new(FixedProbe(50.0)));
        let mut media = new_media();
        engine.apply_all(&mut media, &library(), now);

        assert_eq!(media.default_delete_at, now + Duration::days(30));
        assert_eq!(media.disk_usage_rows.len(), 1);
        assert_eq!(media.disk_usage_rows[0].delete_date, now + Duration::days(3));
        // Usage below threshold: the estimate is the default schedule.
        assert_eq!(media.estimated_delete_at, Some(now + Duration::days(30)));
    }

    #[test]
    fn disk_pressure_fires_before_the_default_schedule() {
        let now = Utc::now();
        let engine = PolicyEngine::new(folders(), Arc::new(FixedProbe(92.0)));
        let mut media = new_media();
        engine.apply_all(&mut media, &library(), now);

        // Estimate jumps to the disk-usage row while the threshold is exceeded.
        assert_eq!(media.estimated_delete_at, Some(now + Duration::days(3)));

        // Four days later the row is due and usage is still high.
        let later = now + Duration::days(4);
        assert!(engine.should_trigger(&input(&media, None), later));
        // The 30-day default alone would not have fired yet.
        assert!(!engine.should_trigger(&input(&media, None), now + Duration::days(2)));
    }

    #[test]
    fn usage_below_threshold_waits_for_the_default() {
        let now = Utc::now();
        let engine = PolicyEngine::new(folders(), Arc::new(FixedProbe(50.0)));
        let mut media = new_media();
        engine.apply_all(&mut media, &library(), now);

        assert!(!engine.should_trigger(&input(&media, None), now + Duration::days(4)));
        assert!(engine.should_trigger(&input(&media, None), now + Duration::days(31)));
    }

    #[test]
    fn probe_failure_means_no_trigger_without_error() {
        let now = Utc::now();
        let engine = PolicyEngine::new(folders(), Arc::new(FailingProbe));
        let mut media = new_media();
        engine.apply_all(&mut media, &library(), now);

        assert!(!engine.should_trigger(&input(&media, None), now + Duration::days(4)));
        // The default policy still carries the estimate.
        assert_eq!(media.estimated_delete_at, Some(now + Duration::days(30)));
    }

    #[test]
    fn protection_blocks_every_policy() {
        let now = Utc::now();
        let engine = PolicyEngine::new(folders(), Arc::new(FixedProbe(99.0)));
        let mut media = new_media();
        engine.apply_all(&mut media, &library(), now);

        let protected = input(&media, Some(now + Duration::days(365)));
        assert!(!engine.should_trigger(&protected, now + Duration::days(60)));

        let lapsed = input(&media, Some(now - Duration::days(1)));
        assert!(engine.should_trigger(&lapsed, now + Duration::days(60)));
    }
}
