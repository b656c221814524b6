//! Server boot: build the kernel, spawn the sleep worker, assemble the
//! router and serve.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use engram_domain::config::Config;
use engram_kernel::sleep::SleepOptions;
use engram_kernel::Kernel;

use crate::api;
use crate::state::AppState;

/// Errors that should map to exit code 69 (service unavailable).
#[derive(Debug, thiserror::Error)]
#[error("bind failed: {0}")]
pub struct BindError(pub std::io::Error);

pub async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(data_dir = %config.data_dir.display(), "engram starting");

    let kernel = Arc::new(Kernel::from_config(config.clone()).context("building kernel")?);
    let state = AppState {
        config: config.clone(),
        kernel: kernel.clone(),
    };

    if config.server.admin_key.is_some() {
        tracing::info!("session issuance gated by ENGRAM_ADMIN_KEY");
    } else {
        tracing::warn!("ENGRAM_ADMIN_KEY not set — session issuance is open to local callers");
    }

    // ── Background sleep worker ──────────────────────────────────────
    if config.sleep.enabled {
        let worker_kernel = kernel.clone();
        let interval_minutes = config.sleep.interval_minutes.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                interval_minutes * 60,
            ));
            // The first tick fires immediately; skip it so boot stays fast.
            interval.tick().await;
            loop {
                interval.tick().await;
                match worker_kernel
                    .run_sleep_cycle_internal(&SleepOptions::default())
                    .await
                {
                    Ok(report) => tracing::info!(
                        users = report.users.len(),
                        forgotten = report.totals.forgotten,
                        distilled = report.totals.distilled,
                        "background sleep cycle finished"
                    ),
                    // Background failures are logged and retried next
                    // interval; they never take the process down.
                    Err(e) => tracing::warn!(error = %e, "background sleep cycle failed"),
                }
            }
        });
        tracing::info!(interval_minutes, "sleep worker started");
    } else {
        tracing::info!("sleep worker disabled");
    }

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router(state)
        .layer(build_cors_layer(&config.server.cors_origins))
        .layer(tower::limit::ConcurrencyLimitLayer::new(256));

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(BindError)
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "engram listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins. A literal
/// `"*"` allows all origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    use axum::http::header;

    if origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let exact: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(exact))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
