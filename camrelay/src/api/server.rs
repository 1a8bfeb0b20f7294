//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use axum::http::Method;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::stream::{SourceResolver, StreamManager};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    /// Stream lifecycle manager
    pub manager: StreamManager,
    /// Maps stream names to upstream URLs
    pub resolver: Arc<dyn SourceResolver>,
}

impl AppState {
    pub fn new(manager: StreamManager, resolver: Arc<dyn SourceResolver>) -> Self {
        Self {
            start_time: Instant::now(),
            manager,
            resolver,
        }
    }
}

/// Request path classes that get quieter request tracing.
fn trace_level(path: &str) -> Option<tracing::Level> {
    if path.starts_with("/health") {
        None
    } else if path.starts_with("/video/") && !path.ends_with(".m3u8") {
        // Segment fetches arrive every few seconds per viewer.
        Some(tracing::Level::DEBUG)
    } else {
        Some(tracing::Level::INFO)
    }
}

pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::HEAD, Method::DELETE])
            .allow_headers(Any);

        routes::create_router(self.state.clone())
            .layer(cors)
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(|req: &Request| match trace_level(req.uri().path()) {
                        None => Span::none(),
                        Some(level) => {
                            let mut make_span =
                                tower_http::trace::DefaultMakeSpan::new().level(level);
                            use tower_http::trace::MakeSpan;
                            make_span.make_span(req)
                        }
                    })
                    .on_response(
                        |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                            if span.is_disabled() {
                                return;
                            }
                            let on_response = tower_http::trace::DefaultOnResponse::new()
                                .level(tracing::Level::INFO);
                            use tower_http::trace::OnResponse;
                            on_response.on_response(res, latency, span);
                        },
                    ),
            )
    }

    /// Serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {e}")))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Other(format!("Failed to bind {addr}: {e}")))?;

        tracing::info!("HLS relay listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await?;

        Ok(())
    }
}
