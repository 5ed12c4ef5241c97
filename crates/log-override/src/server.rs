use std::{net::SocketAddr, time::Duration};

use anyhow::{Result, anyhow};
use axum::Router;
use axum_server::{Handle, tls_rustls::RustlsConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// In-flight admission requests get this long to complete once shutdown starts
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve the router until the shutdown token is cancelled. HTTPS is used when
/// a TLS configuration is given, plain HTTP otherwise.
pub(crate) async fn run_server(
    addr: SocketAddr,
    tls_config: Option<RustlsConfig>,
    router: Router,
    shutdown: CancellationToken,
) -> Result<()> {
    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        info!("shutting down the server");
        shutdown_handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
    });

    match tls_config {
        None => {
            info!(address = addr.to_string().as_str(), "started HTTP server");
            axum_server::bind(addr)
                .handle(handle)
                .serve(router.into_make_service())
                .await
                .map_err(|e| anyhow!("HTTP server error: {e}"))?;
        }
        Some(tls_config) => {
            info!(address = addr.to_string().as_str(), "started HTTPS server");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(router.into_make_service())
                .await
                .map_err(|e| anyhow!("HTTPS server error: {e}"))?;
        }
    }

    Ok(())
}
