use std::sync::Arc;

use anyhow::Context;
use camrelay::api::{ApiServer, AppState};
use camrelay::config::{AppConfig, SourcesFile};
use camrelay::logging;
use camrelay::stream::{FfmpegLauncher, StaleSweeper, StaticSourceResolver, StreamManager};
use camrelay::utils::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let _log_guard = logging::init_logging(config.log_dir.as_deref())?;

    let cancel_token = CancellationToken::new();
    if let Some(dir) = &config.log_dir {
        logging::start_retention_cleanup(dir.clone(), cancel_token.clone());
    }

    let sources = match &config.sources_file {
        Some(path) => SourcesFile::load(path)
            .await
            .with_context(|| format!("loading sources from {}", path.display()))?,
        None => SourcesFile::default(),
    };
    let resolver = StaticSourceResolver::new(sources, config.source_url_template.clone());
    let configured = resolver.configured_names().count();
    if configured == 0 && config.source_url_template.is_none() {
        warn!("No sources configured and no SOURCE_URL_TEMPLATE set; every stream will be unknown");
    }

    fs::ensure_dir_all_with_op("creating output directory", &config.stream.output_dir).await?;
    info!(
        output_dir = %config.stream.output_dir.display(),
        sources = configured,
        "camrelay starting"
    );

    let launcher = FfmpegLauncher::new(config.ffmpeg_path.clone(), config.hls.clone());
    let manager = StreamManager::new(config.stream.clone(), Arc::new(launcher));

    let sweeper = StaleSweeper::new(manager.clone()).spawn(cancel_token.clone());

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let state = AppState::new(manager.clone(), Arc::new(resolver));
    let server = ApiServer::new(config.server.clone(), state, cancel_token.clone());
    let result = server.run().await;

    // Stop background tasks even when the server failed to start.
    cancel_token.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Stale sweeper task failed");
    }
    manager.shutdown().await;
    info!("camrelay stopped");

    result.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
