use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Destruction granularity for TV series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupMode {
    All,
    KeepEpisodes,
    KeepSeasons,
}

impl Default for CleanupMode {
    fn default() -> Self {
        CleanupMode::All
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Five-field cron expression driving the cleanup job.
    #[serde(default = "default_cleanup_schedule")]
    pub cleanup_schedule: String,
    /// Suppresses every destructive operation, remote and local.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub cleanup_mode: CleanupMode,
    #[serde(default = "default_keep_count")]
    pub keep_count: u32,
    #[serde(default)]
    pub enable_leaving_collections: bool,
    #[serde(default = "default_leaving_movies")]
    pub leaving_collections_movie_name: String,
    #[serde(default = "default_leaving_tv")]
    pub leaving_collections_tv_name: String,

    pub database: DatabaseConfig,
    #[serde(default)]
    pub image_cache: ImageCacheConfig,

    pub movie_indexer: ServiceConfig,
    pub series_indexer: ServiceConfig,
    pub streaming: ServiceConfig,
    pub stats: ServiceConfig,
    pub request_service: Option<ServiceConfig>,
    pub channel_service: Option<ChannelServiceConfig>,

    #[serde(default)]
    pub libraries: HashMap<String, LibraryConfig>,

    pub email: Option<EmailConfig>,
    pub ntfy: Option<NtfyConfig>,
    pub webpush: Option<WebPushConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ImageCacheConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelServiceConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cleanup_delay")]
    pub cleanup_delay_days: i64,
    #[serde(default = "default_protection_period")]
    pub protection_period_days: i64,
    #[serde(default)]
    pub filter: LibraryFilterConfig,
    #[serde(default)]
    pub disk_usage_thresholds: Vec<DiskUsageThreshold>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LibraryFilterConfig {
    #[serde(default)]
    pub content_age_threshold_days: i64,
    #[serde(default)]
    pub last_stream_threshold_days: i64,
    #[serde(default)]
    pub content_size_threshold_bytes: i64,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub channel_filter_enabled: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DiskUsageThreshold {
    pub usage_percent: f64,
    pub max_cleanup_delay_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default)]
    pub use_ssl: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NtfyConfig {
    pub server_url: String,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebPushConfig {
    pub vapid_email: String,
    pub public_key: String,
    pub private_key: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}

fn default_cleanup_schedule() -> String {
    "0 3 * * *".into()
}

fn default_keep_count() -> u32 {
    1
}

fn default_leaving_movies() -> String {
    "Leaving Soon - Movies".into()
}

fn default_leaving_tv() -> String {
    "Leaving Soon - TV".into()
}

fn default_true() -> bool {
    true
}

fn default_cleanup_delay() -> i64 {
    30
}

fn default_protection_period() -> i64 {
    90
}

fn default_smtp_port() -> u16 {
    587
}

impl Config {
    /// Load from a TOML file with `SWEEPARR_*` environment overrides
    /// (`SWEEPARR_DRY_RUN=true`, `SWEEPARR_DATABASE__PATH=...`).
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("SWEEPARR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let cfg: Config = cfg.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.keep_count < 1 {
            anyhow::bail!("keep_count must be >= 1");
        }
        for (name, lib) in &self.libraries {
            if lib.cleanup_delay_days < 0 || lib.protection_period_days < 0 {
                anyhow::bail!("library '{name}': negative retention periods are invalid");
            }
            for t in &lib.disk_usage_thresholds {
                if !(0.0..=100.0).contains(&t.usage_percent) {
                    anyhow::bail!("library '{name}': usage_percent must be within 0..=100");
                }
                if t.max_cleanup_delay_days < 0 {
                    anyhow::bail!("library '{name}': max_cleanup_delay_days must be >= 0");
                }
            }
        }
        Ok(())
    }

    pub fn library(&self, name: &str) -> Option<&LibraryConfig> {
        self.libraries.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(toml: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        f.write_all(toml.as_bytes()).unwrap();
        f
    }

    const MINIMAL: &str = r#"
        [database]
        path = "/tmp/sweeparr-test.db"
        [movie_indexer]
        url = "http://localhost:7878"
        api_key = "a"
        [series_indexer]
        url = "http://localhost:8989"
        api_key = "b"
        [streaming]
        url = "http://localhost:8096"
        api_key = "c"
        [stats]
        url = "http://localhost:3000"
        api_key = "d"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config(MINIMAL);
        let cfg = Config::load(f.path()).unwrap();
        assert_eq!(cfg.cleanup_schedule, "0 3 * * *");
        assert_eq!(cfg.keep_count, 1);
        assert_eq!(cfg.cleanup_mode, CleanupMode::All);
        assert!(!cfg.dry_run);
        assert!(cfg.libraries.is_empty());
    }

    #[test]
    fn library_block_parses() {
        let toml = format!(
            r#"{MINIMAL}
            [libraries.Movies]
            cleanup_delay_days = 45
            protection_period_days = 14
            [libraries.Movies.filter]
            content_age_threshold_days = 120
            exclude_tags = ["favorite"]
            [[libraries.Movies.disk_usage_thresholds]]
            usage_percent = 90.0
            max_cleanup_delay_days = 3
        "#
        );
        let f = write_config(&toml);
        let cfg = Config::load(f.path()).unwrap();
        let lib = cfg.library("Movies").unwrap();
        assert!(lib.enabled);
        assert_eq!(lib.cleanup_delay_days, 45);
        assert_eq!(lib.filter.exclude_tags, vec!["favorite"]);
        assert_eq!(lib.disk_usage_thresholds.len(), 1);
        assert_eq!(lib.disk_usage_thresholds[0].max_cleanup_delay_days, 3);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let toml = format!(
            r#"{MINIMAL}
            [libraries.TV]
            [[libraries.TV.disk_usage_thresholds]]
            usage_percent = 140.0
            max_cleanup_delay_days = 3
        "#
        );
        let f = write_config(&toml);
        assert!(Config::load(f.path()).is_err());
    }
}
