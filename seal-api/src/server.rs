//! Serving utilities for the seal binaries.
//!
//! Serves a [`Router`] with a fallback handler (for unmatched paths),
//! load shedding, a concurrency limit, a server-side handling timeout, and
//! graceful shutdown on the process [`ShutdownSignal`].

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use axum::{error_handling::HandleErrorLayer, Router};
use seal_common::{shutdown::ShutdownSignal, task::SealTask};
use tower::{BoxError, ServiceBuilder};
use tracing::{info, info_span, warn};

use crate::error::{ApiError, ApiErrorKind};

/// A configuration object for the tower middleware.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LayerConfig {
    /// The maximum # of requests we'll process at once. Excess requests are
    /// shed with `503 Service Unavailable`.
    pub concurrency: usize,
    /// The maximum time a server can spend handling a request.
    pub handling_timeout: Duration,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4096,
            handling_timeout: Duration::from_secs(15),
        }
    }
}

/// Binds `bind_addr` and spawns a named server task which serves `router`
/// until a shutdown signal is received. Returns the task handle along with
/// the bound socket address (useful when binding port 0 in tests).
pub async fn spawn_server_task(
    bind_addr: SocketAddr,
    router: Router<()>,
    layer_config: LayerConfig,
    server_name: &'static str,
    shutdown: ShutdownSignal,
) -> anyhow::Result<(SealTask<()>, SocketAddr)> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("Could not bind TCP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Could not get local address")?;

    let middleware = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(handle_middleware_error))
        .load_shed()
        .concurrency_limit(layer_config.concurrency)
        .timeout(layer_config.handling_timeout);

    let router = router.fallback(default_fallback).layer(middleware);

    let span = info_span!(parent: None, "(server)", name = server_name);
    let task = SealTask::spawn_with_span(server_name, span, async move {
        info!("Serving {server_name} at http://{local_addr}");
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.recv_owned())
            .await;
        match result {
            Ok(()) => info!("{server_name} server shut down"),
            Err(e) => warn!("{server_name} server errored: {e:#}"),
        }
    });

    Ok((task, local_addr))
}

/// Called if no routes were matched: return a "bad endpoint" rejection along
/// with the requested method and path.
async fn default_fallback(
    method: http::Method,
    uri: http::Uri,
) -> ApiError {
    ApiError::not_found(format!("Bad endpoint: {method} {uri}"))
}

/// Maps middleware [`BoxError`]s (timeout, load shed) into wire errors.
async fn handle_middleware_error(error: BoxError) -> ApiError {
    if error.is::<tower::timeout::error::Elapsed>() {
        ApiError::new(ApiErrorKind::Timeout, "Request handling timed out")
    } else if error.is::<tower::load_shed::error::Overloaded>() {
        ApiError::new(
            ApiErrorKind::TransientProvider,
            "Server is overloaded; try again later",
        )
    } else {
        ApiError::server(format!("Middleware error: {error:#}"))
    }
}
