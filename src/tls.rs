use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::{self, ServerConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("no private key found in {0}")]
    NoKey(PathBuf),
    #[error("rejected certificate/key pair: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Build the acceptor for `(cert, key)` PEM files. `None` serves plaintext only.
pub fn load_tls_acceptor(files: Option<(&Path, &Path)>) -> Result<Option<TlsAcceptor>, TlsError> {
    let Some((cert_path, key_path)) = files else {
        return Ok(None);
    };
    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| TlsError::Read { path, source }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut open(cert_path)?)
        .collect::<Result<_, _>>()
        .map_err(read_err(cert_path))?;
    let key = rustls_pemfile::private_key(&mut open(key_path)?)
        .map_err(read_err(key_path))?
        .ok_or_else(|| TlsError::NoKey(key_path.to_path_buf()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];

    tracing::info!(cert = %cert_path.display(), "tls enabled");
    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}
