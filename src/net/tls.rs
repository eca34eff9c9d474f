//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;

use crate::config::{ServerConfig, TlsConfig};

/// Error type for TLS setup.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate or key file missing.
    #[error("{kind} file not found: {path}")]
    NotFound { kind: &'static str, path: PathBuf },

    /// The file holds no usable PEM item of the expected kind.
    #[error("no {kind} found in {path}")]
    Empty { kind: &'static str, path: PathBuf },

    /// Reading or parsing failed.
    #[error("failed to load {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// rustls rejected the certificate/key pair.
    #[error("invalid certificate/key pair: {0}")]
    Rejected(std::io::Error),
}

/// Load the certificate and key named in `tls`, paths relative to the root dir.
pub async fn load_tls_config(
    config: &ServerConfig,
    tls: &TlsConfig,
) -> Result<RustlsConfig, TlsError> {
    let cert_path = config.resolve(&tls.cert_file);
    let key_path = config.resolve(&tls.key_file);

    for (kind, path) in [("certificate", &cert_path), ("private key", &key_path)] {
        if !path.exists() {
            return Err(TlsError::NotFound {
                kind,
                path: path.clone(),
            });
        }
    }

    if tls.skip_certificate_validation {
        tracing::warn!(cert = %cert_path.display(), "Skipping certificate pre-validation");
    } else {
        validate_pem(&cert_path, &key_path)?;
    }

    let loaded = RustlsConfig::from_pem_file(&cert_path, &key_path)
        .await
        .map_err(TlsError::Rejected)?;

    tracing::info!(cert = %cert_path.display(), key = %key_path.display(), "TLS configuration loaded");
    Ok(loaded)
}

/// Wrap a caller-built rustls config.
pub fn from_custom(config: Arc<rustls::ServerConfig>) -> RustlsConfig {
    RustlsConfig::from_config(config)
}

fn validate_pem(cert_path: &Path, key_path: &Path) -> Result<(), TlsError> {
    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| TlsError::Read { path, source }
    };

    let mut reader = BufReader::new(File::open(cert_path).map_err(read_err(cert_path))?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err(cert_path))?;
    if certs.is_empty() {
        return Err(TlsError::Empty {
            kind: "certificate",
            path: cert_path.to_path_buf(),
        });
    }

    let mut reader = BufReader::new(File::open(key_path).map_err(read_err(key_path))?);
    match rustls_pemfile::private_key(&mut reader).map_err(read_err(key_path))? {
        Some(_) => Ok(()),
        None => Err(TlsError::Empty {
            kind: "private key",
            path: key_path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls(cert: &str, key: &str) -> TlsConfig {
        TlsConfig {
            cert_file: cert.into(),
            key_file: key.into(),
            skip_certificate_validation: false,
        }
    }

    #[tokio::test]
    async fn missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            root_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let err = load_tls_config(&config, &tls("cert.pem", "key.pem"))
            .await
            .unwrap_err();
        assert!(matches!(err, TlsError::NotFound { kind: "certificate", .. }));
    }

    #[tokio::test]
    async fn garbage_pem_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cert.pem"), "not a certificate").unwrap();
        std::fs::write(dir.path().join("key.pem"), "not a key").unwrap();
        let config = ServerConfig {
            root_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let err = load_tls_config(&config, &tls("cert.pem", "key.pem"))
            .await
            .unwrap_err();
        assert!(matches!(err, TlsError::Empty { kind: "certificate", .. }));
    }
}
