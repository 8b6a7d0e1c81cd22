use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use axum::{
    routing::{get, post},
    Router,
};

use sweeparr::clients::{
    channels::ChannelServiceClient, http_client, indexer::MovieIndexerClient,
    indexer::SeriesIndexerClient, requests::RequestServiceClient, stats::StatsClient,
    streaming::StreamingClient, ChannelGuide, RequestDirectory, Upstreams,
};
use sweeparr::config::Config;
use sweeparr::db;
use sweeparr::routes;
use sweeparr::services::cleanup::{clear_image_cache, CleanupService};
use sweeparr::services::email::EmailService;
use sweeparr::services::keep::KeepService;
use sweeparr::services::legacy::IGNORE_TAG;
use sweeparr::services::metrics;
use sweeparr::services::notify::{NotifyService, NtfyClient};
use sweeparr::services::policy::StatvfsProbe;
use sweeparr::services::scheduler::Scheduler;
use sweeparr::services::webpush::{generate_vapid_keys, WebPushService};
use sweeparr::AppState;

#[derive(Parser, Debug)]
#[command(name = "sweeparr", version, about = "Media retention engine for self-hosted setups")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "sweeparr.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the engine and its HTTP API.
    Serve,
    /// Strip engine tags from both indexers.
    Reset {
        /// Also remove the permanent-ignore marker.
        #[arg(long)]
        include_ignore: bool,
        /// Additional tag labels to strip, comma separated.
        #[arg(long, value_delimiter = ',')]
        include_tags: Vec<String>,
    },
    /// Print a fresh VAPID keypair for web push.
    GenerateVapidKeys,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Print row counts of the local database.
    DbStats,
}

fn build_upstreams(config: &Arc<Config>, http: &reqwest::Client) -> Upstreams {
    Upstreams {
        movie_indexer: Arc::new(MovieIndexerClient::new(http.clone(), &config.movie_indexer)),
        series_indexer: Arc::new(SeriesIndexerClient::new(
            http.clone(),
            &config.series_indexer,
            config.cleanup_mode,
            config.keep_count,
        )),
        streaming: Arc::new(StreamingClient::new(http.clone(), &config.streaming)),
        stats: Arc::new(StatsClient::new(http.clone(), &config.stats)),
        requests: config.request_service.as_ref().map(|cfg| {
            Arc::new(RequestServiceClient::new(http.clone(), cfg)) as Arc<dyn RequestDirectory>
        }),
        channels: config.channel_service.as_ref().map(|cfg| {
            Arc::new(ChannelServiceClient::new(http.clone(), cfg)) as Arc<dyn ChannelGuide>
        }),
    }
}

async fn serve(config_path: &Path) -> anyhow::Result<()> {
    let config = Arc::new(Config::load(config_path)?);

    // The legacy tag migration keys off the database file being absent.
    let first_run = !config.database.path.exists();
    let pool = db::create_pool(&config.database.path).await?;
    db::run_migrations(&pool).await?;
    info!("database ready at {}", config.database.path.display());

    let http = http_client();
    let upstreams = build_upstreams(&config, &http);

    let email = match &config.email {
        Some(cfg) => {
            let service = EmailService::new(cfg)?;
            info!("SMTP email service configured");
            Some(Arc::new(service))
        }
        None => {
            info!("SMTP not configured, email summaries disabled");
            None
        }
    };
    let ntfy = config
        .ntfy
        .clone()
        .map(|cfg| NtfyClient::new(http.clone(), cfg));
    let webpush = config
        .webpush
        .clone()
        .map(|cfg| Arc::new(WebPushService::new(http.clone(), cfg)));
    let notify = Arc::new(NotifyService::new(email, ntfy, webpush.clone()));

    let cleanup = Arc::new(CleanupService::new(
        pool.clone(),
        config.clone(),
        upstreams.clone(),
        notify.clone(),
        Arc::new(StatvfsProbe),
        first_run,
    ));
    let keep = Arc::new(KeepService::new(
        pool.clone(),
        config.clone(),
        upstreams.clone(),
        notify,
    ));

    let token = CancellationToken::new();
    let mut scheduler = Scheduler::new(token.clone());
    {
        let cleanup = cleanup.clone();
        scheduler.register(
            "cleanup",
            "Collect, filter and delete media past retention",
            &config.cleanup_schedule,
            true,
            Arc::new(move |job_token| {
                let cleanup = cleanup.clone();
                Box::pin(async move {
                    let result = cleanup.run(job_token).await;
                    let status = if result.is_ok() { "success" } else { "failed" };
                    metrics::CLEANUP_RUNS.with_label_values(&[status]).inc();
                    result
                })
            }),
        )?;
    }
    if let Some(cache_path) = config.image_cache.path.clone() {
        scheduler.register(
            "clear_image_cache",
            "Drop cached images past their retention window",
            "0 4 * * 0",
            false,
            Arc::new(move |_job_token| {
                let cache_path = cache_path.clone();
                Box::pin(async move {
                    let removed = clear_image_cache(&cache_path).await?;
                    info!("image cache: {removed} file(s) removed");
                    Ok(())
                })
            }),
        )?;
    }
    let scheduler = Arc::new(scheduler);
    scheduler.start();

    let state = AppState {
        db: pool,
        config: config.clone(),
        keep,
        scheduler: scheduler.clone(),
        webpush,
    };

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_text))
        // Media & retention decisions
        .route("/api/media", get(routes::media::list_media))
        .route("/api/media/pending", get(routes::media::list_pending))
        .route("/api/media/{id}/history", get(routes::media::media_history))
        .route("/api/media/{id}/keep", post(routes::media::request_keep))
        .route("/api/media/{id}/decide", post(routes::media::decide))
        .route("/api/media/{id}/keep-forever", post(routes::media::keep_forever))
        .route("/api/media/{id}/protect", post(routes::media::admin_protect))
        .route("/api/media/{id}/unkeep", post(routes::media::admin_unkeep))
        // Jobs
        .route("/api/jobs", get(routes::jobs::list_jobs))
        .route("/api/jobs/{name}/run", post(routes::jobs::run_job))
        // Web push registry
        .route("/api/push/public-key", get(routes::push::public_key))
        .route("/api/push/subscribe", post(routes::push::subscribe))
        .route("/api/push/unsubscribe", post(routes::push::unsubscribe))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("sweeparr listening on {}", config.listen);
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    let shutdown_token = token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_token.cancel();
        })
        .await?;

    scheduler.shutdown().await;
    Ok(())
}

async fn reset(
    config_path: &Path,
    include_ignore: bool,
    include_tags: Vec<String>,
) -> anyhow::Result<()> {
    let config = Arc::new(Config::load(config_path)?);
    let upstreams = build_upstreams(&config, &http_client());

    let mut additional = include_tags;
    if include_ignore {
        additional.push(IGNORE_TAG.to_string());
    }
    upstreams.movie_indexer.reset_tags(&additional).await?;
    upstreams.series_indexer.reset_tags(&additional).await?;
    info!("engine tags removed from both indexers");
    Ok(())
}

async fn db_stats(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let pool = db::create_pool(&config.database.path).await?;

    for table in ["media", "disk_usage_policies", "requests", "users", "history_events"] {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&pool)
            .await?;
        println!("{table:>20}: {count}");
    }
    let deleted: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM media WHERE deleted_at IS NOT NULL")
            .fetch_one(&pool)
            .await?;
    println!("{:>20}: {deleted}", "media (soft-deleted)");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve => serve(&cli.config).await,
        Command::Reset { include_ignore, include_tags } => {
            reset(&cli.config, include_ignore, include_tags).await
        }
        Command::GenerateVapidKeys => {
            let (public, private) = generate_vapid_keys();
            println!("VAPID public key:  {public}");
            println!("VAPID private key: {private}");
            Ok(())
        }
        Command::Migrate => {
            let config = Config::load(&cli.config)?;
            let pool = db::create_pool(&config.database.path).await?;
            db::run_migrations(&pool).await?;
            info!("migrations applied");
            Ok(())
        }
        Command::DbStats => db_stats(&cli.config).await,
    }
}
