//! TLS client settings for SSL and SASL_SSL brokers.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::config::SecurityConfig;
use crate::error::KafkaError;
use crate::Result;

/// Build a rustls client config: custom CA or webpki roots, optional mTLS.
pub fn build_tls_config(security: &SecurityConfig) -> Result<ClientConfig> {
    let roots = match &security.ssl_ca_location {
        Some(ca_path) => custom_roots(ca_path)?,
        None => RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        },
    };
    let builder = ClientConfig::builder().with_root_certificates(roots);

    match (
        &security.ssl_certificate_location,
        &security.ssl_key_location,
    ) {
        (Some(cert_path), Some(key_path)) => {
            debug!("Using client certificate {}", cert_path.display());
            builder
                .with_client_auth_cert(read_certificates(cert_path)?, read_private_key(key_path)?)
                .map_err(|e| {
                    crate::Error::from(KafkaError::TlsConfig(format!(
                        "client certificate rejected: {}",
                        e
                    )))
                })
        }
        (None, None) => Ok(builder.with_no_client_auth()),
        _ => Err(KafkaError::TlsConfig(
            "ssl_certificate_location and ssl_key_location must be set together".to_string(),
        )
        .into()),
    }
}

fn custom_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in read_certificates(path)? {
        roots.add(cert).map_err(|e| pem_error(path, e))?;
    }
    debug!("Trusting {} CA certificate(s) from {}", roots.len(), path.display());
    Ok(roots)
}

fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open_pem(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| pem_error(path, e))?;

    if certs.is_empty() {
        return Err(pem_error(path, "no certificates in file"));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open_pem(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| pem_error(path, e))?
        .ok_or_else(|| pem_error(path, "no private key in file"))
}

fn open_pem(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| pem_error(path, e))
}

fn pem_error(path: &Path, message: impl std::fmt::Display) -> crate::Error {
    KafkaError::PemLoad {
        path: path.display().to_string(),
        message: message.to_string(),
    }
    .into()
}
