// Library exports for the binary and tests
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::services::keep::KeepService;
use crate::services::scheduler::Scheduler;
use crate::services::webpush::WebPushService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    pub keep: Arc<KeepService>,
    pub scheduler: Arc<Scheduler>,
    pub webpush: Option<Arc<WebPushService>>,
}
