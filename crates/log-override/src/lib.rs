//! Per-deployment log level overrides for Kubernetes workloads.
//!
//! The `webhook` subcommand mounts the override ConfigMap into annotated
//! Deployments, the `operator` one writes `LoggingOverride` resources into
//! that ConfigMap.
//!
//! The webhook accepts `admission.k8s.io/v1` AdmissionReviews by default.
//! Older clusters sending `admission.k8s.io/v1beta1` reviews are served by
//! passing `--admission-api-version admission.k8s.io/v1beta1`.

pub mod api;
mod certs;
pub mod cli;
pub mod config;
pub mod crd;
pub mod errors;
pub mod injector;
pub mod operator;
pub mod patch;
pub mod queue;
pub mod reconciler;
mod server;
pub mod tracing;
pub mod watch;

use ::tracing::{debug, error, info};
use anyhow::{Result, anyhow};
use lazy_static::lazy_static;
use std::{
    process,
    sync::{Arc, PoisonError, RwLock},
};
use tokio::{
    runtime::Runtime,
    signal::unix::{SignalKind, signal},
};
use tokio_util::sync::CancellationToken;

use api::state::ApiServerState;
use config::{CommandConfig, Config, OperatorConfig, WebhookConfig};

lazy_static! {
    static ref TRACE_SYSTEM_INITIALIZED: RwLock<bool> = RwLock::new(false);
}

pub fn run(config: Config) -> Result<()> {
    if let CommandConfig::Crd = config.command {
        print!("{}", crd::crd_manifest()?);
        return Ok(());
    }

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match tracing::setup_tracing(&config.log_level, &config.log_fmt, config.log_no_color) {
            Err(err) => fatal_error(err.to_string()),
            Ok(_) => {
                debug!("tracing system ready");
                *TRACE_SYSTEM_INITIALIZED
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = true;
            }
        };

        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown_signal().await {
                error!(error = %e, "cannot listen for shutdown signals");
            }
            signal_cancel.cancel();
        });

        let result = match config.command {
            CommandConfig::Webhook(webhook) => run_webhook(webhook, cancel).await,
            CommandConfig::Operator(operator) => run_operator(operator, cancel).await,
            CommandConfig::Crd => Ok(()),
        };
        if let Err(e) = result {
            fatal_error(e.to_string());
        }
    });

    Ok(())
}

async fn run_webhook(config: WebhookConfig, cancel: CancellationToken) -> Result<()> {
    let tls_config = match &config.tls_config {
        Some(tls_config) => Some(certs::create_tls_config(tls_config).await?),
        None => None,
    };

    let state = Arc::new(ApiServerState {
        injection_settings: config.injection_settings,
        admission_api_version: config.admission_api_version,
    });
    server::run_server(config.addr, tls_config, api::router(state), cancel).await
}

async fn run_operator(config: OperatorConfig, cancel: CancellationToken) -> Result<()> {
    let client = kube::Client::try_default()
        .await
        .map_err(|e| anyhow!("Cannot connect to Kubernetes cluster: {e}"))?;
    operator::run(client, config, cancel).await
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT detected, shutting down"),
        _ = sigterm.recv() => info!("SIGTERM detected, shutting down"),
    }
    Ok(())
}

pub fn fatal_error(msg: String) -> ! {
    let trace_system_ready = *TRACE_SYSTEM_INITIALIZED
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    if trace_system_ready {
        error!("{}", msg);
    } else {
        eprintln!("{msg}");
    }

    process::exit(1);
}
