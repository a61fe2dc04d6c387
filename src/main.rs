use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod middleware;
mod modules;
mod routes;
mod state;
#[cfg(test)]
mod testing;
mod workers;

use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool::{connect_to_db, run_migrations};
use crate::infrastructure::storage::BlobStore;
use crate::infrastructure::storage::s3::StorageService;
use crate::modules::clip::repository::{ClipRepository, ClipStore};
use crate::state::AppState;
use crate::workers::policy::TranscodingPolicy;
use crate::workers::progress::ProgressTracker;
use crate::workers::scheduler::JobScheduler;
use crate::workers::transcoder::Transcoder;

/// How long workers may keep going on their current clip after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(120);

async fn stopped(mut signal: watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting server...");

    let config = AppConfig::new().context("missing required environment variable")?;

    let pool = connect_to_db(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let storage = StorageService::new(
        &config.minio_url,
        &config.minio_bucket,
        &config.minio_access_key,
        &config.minio_secret_key,
    )
    .await;

    let clips: Arc<dyn ClipStore> = Arc::new(ClipRepository::new(pool));
    let blobs: Arc<dyn BlobStore> = Arc::new(storage);

    let progress = Arc::new(ProgressTracker::new(config.progress_shards));
    let blob_base = Url::parse(&config.blob_proxy_url()).context("invalid blob proxy url")?;
    let transcoder = Transcoder::new(
        Arc::clone(&clips),
        Arc::clone(&blobs),
        TranscodingPolicy::new(config.ffprobe_path.clone()),
        config.ffmpeg_path.clone(),
        blob_base,
    );
    let scheduler = Arc::new(JobScheduler::new(
        config.scheduler(),
        Arc::new(transcoder),
        progress,
    ));

    let state = AppState::new(
        config.clone(),
        Arc::clone(&clips),
        blobs,
        Arc::clone(&scheduler),
    );

    let api_addr = format!("0.0.0.0:{}", config.server_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind {api_addr}"))?;
    let proxy_addr = format!("127.0.0.1:{}", config.blob_proxy_port);
    let proxy_listener = tokio::net::TcpListener::bind(&proxy_addr)
        .await
        .with_context(|| format!("failed to bind {proxy_addr}"))?;

    // The proxy outlives the API so workers can finish their current clip.
    let (stop_api, api_signal) = watch::channel(false);
    let (stop_proxy, proxy_signal) = watch::channel(false);

    let proxy = tokio::spawn(
        axum::serve(proxy_listener, app::create_blob_proxy(state.clone()))
            .with_graceful_shutdown(stopped(proxy_signal))
            .into_future(),
    );
    info!("Blob proxy running on http://{proxy_addr}");

    scheduler.start()?;

    // Before the API serves, so a fresh upload is never queued twice.
    match scheduler.recover_orphans(clips.as_ref()).await {
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to recover orphaned clips"),
    }

    let api = tokio::spawn(
        axum::serve(api_listener, app::create_app(state))
            .with_graceful_shutdown(stopped(api_signal))
            .into_future(),
    );
    info!("🚀 Server running on http://{api_addr}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down...");

    let _ = stop_api.send(true);
    scheduler.shutdown(SHUTDOWN_GRACE).await;
    let _ = stop_proxy.send(true);

    for (name, server) in [("api", api), ("blob proxy", proxy)] {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(server = name, error = %e, "Server exited with an error"),
            Err(e) => error!(server = name, error = %e, "Server task failed"),
        }
    }

    info!("Bye");
    Ok(())
}
