use std::{path::Path, sync::Arc};

use anyhow::{Result, anyhow};
use axum_server::tls_rustls::RustlsConfig;
use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, pem::SliceIter};
use tracing::{info, warn};

use crate::config::TlsConfig;

/// Build the TLS configuration of the HTTPS server out of the PEM files
pub(crate) async fn create_tls_config(tls_config: &TlsConfig) -> Result<RustlsConfig> {
    let (certs, key) = load_server_cert_and_key(&tls_config.cert_file, &tls_config.key_file).await?;
    info!(
        cert_file = %tls_config.cert_file.display(),
        certificates = certs.len(),
        "loaded TLS certificate"
    );

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| anyhow!("Cannot build TLS configuration: {e}"))?;

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

// The certificate file can hold the whole chain, leaf first
async fn load_server_cert_and_key(
    cert_file: &Path,
    key_file: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_contents = tokio::fs::read(cert_file)
        .await
        .map_err(|e| anyhow!("Error opening certificate file {}: {e}", cert_file.display()))?;
    let key_contents = tokio::fs::read(key_file)
        .await
        .map_err(|e| anyhow!("Error opening key file {}: {e}", key_file.display()))?;

    let cert_iterator: SliceIter<CertificateDer> = SliceIter::new(&cert_contents[..]);
    let certs: Vec<CertificateDer<'static>> = cert_iterator
        .filter_map(|it| {
            if let Err(ref e) = it {
                warn!("Cannot parse certificate: {e}");
            }
            it.ok()
        })
        .collect();

    if certs.is_empty() {
        return Err(anyhow!(
            "Expected at least one certificate in {}, found none",
            cert_file.display()
        ));
    }

    let key_iterator: SliceIter<PrivateKeyDer> = SliceIter::new(&key_contents[..]);
    let mut keys: Vec<PrivateKeyDer<'static>> = key_iterator
        .filter_map(|it| {
            if let Err(ref e) = it {
                warn!("Cannot parse private key: {e}");
            }
            it.ok()
        })
        .collect();

    if keys.len() != 1 {
        return Err(anyhow!(
            "Expected exactly one key in key file, found {}",
            keys.len()
        ));
    }

    Ok((certs, keys.remove(0)))
}
