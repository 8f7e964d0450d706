//! PKCS#12 client identity for mutual TLS.
//!
//! Banking bundles turn up in both generations of PKCS#12 protection: legacy
//! PBE (RC2-40, 3DES, SHA-1 MAC) from older tooling and PBES2/AES with a
//! SHA-256 MAC from OpenSSL 3. `p12-keystore` decodes both in pure Rust, so
//! the platform TLS provider never has to parse the container itself. The
//! certificate and key leave this module as PEM text.

use p12_keystore::{KeyStore, KeyStoreEntry};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate container not found: {0}")]
    NotFound(PathBuf),

    #[error("certificate container unreadable: {0}")]
    Unreadable(String),

    /// Wrong passphrase or corrupt structure.
    #[error("cannot parse PKCS#12 container: {0}")]
    Parse(String),

    #[error("no certificate bag in PKCS#12 container")]
    MissingCertificate,

    #[error("no private key bag in PKCS#12 container")]
    MissingKey,
}

/// Where the PKCS#12 bytes come from.
#[derive(Debug, Clone)]
pub enum CertificateSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl CertificateSource {
    fn read(&self) -> Result<Vec<u8>, CertificateError> {
        match self {
            CertificateSource::Bytes(bytes) => Ok(bytes.clone()),
            CertificateSource::File(path) => {
                if !path.exists() {
                    return Err(CertificateError::NotFound(path.clone()));
                }
                std::fs::read(path)
                    .map_err(|e| CertificateError::Unreadable(format!("{}: {e}", path.display())))
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            CertificateSource::File(path) => path.display().to_string(),
            CertificateSource::Bytes(bytes) => format!("<{} bytes in memory>", bytes.len()),
        }
    }
}

impl From<&Path> for CertificateSource {
    fn from(path: &Path) -> Self {
        CertificateSource::File(path.to_path_buf())
    }
}

/// PEM-encoded client certificate and PKCS#8 private key.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsIdentity {
    pub certificate_pem: String,
    pub private_key_pem: String,
    /// Whether the server certificate is verified on connections using this identity.
    pub verify_peer: bool,
}

impl TlsIdentity {
    /// Certificate followed by key, the layout `reqwest::Identity::from_pem` expects.
    pub fn pem_bundle(&self) -> Vec<u8> {
        let mut bundle =
            Vec::with_capacity(self.certificate_pem.len() + self.private_key_pem.len() + 1);
        bundle.extend_from_slice(self.certificate_pem.as_bytes());
        if !self.certificate_pem.ends_with('\n') {
            bundle.push(b'\n');
        }
        bundle.extend_from_slice(self.private_key_pem.as_bytes());
        bundle
    }
}

impl fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("certificate_pem_len", &self.certificate_pem.len())
            .field("private_key_pem", &"<redacted>")
            .field("verify_peer", &self.verify_peer)
            .finish()
    }
}

/// Decode a PKCS#12 container into a [`TlsIdentity`].
///
/// The key comes from the first private key chain and the certificate from
/// the leaf of that chain. A container holding only certificates still
/// reports [`CertificateError::MissingKey`] rather than a missing certificate.
pub fn decode(der: &[u8], passphrase: &str, verify_peer: bool) -> Result<TlsIdentity, CertificateError> {
    // MAC is checked before any bag is decrypted; a wrong passphrase fails here.
    let keystore = KeyStore::from_pkcs12(der, passphrase)
        .map_err(|e| CertificateError::Parse(e.to_string()))?;

    let key_chain = keystore.private_key_chain().map(|(_, chain)| chain);

    let cert_der = key_chain
        .and_then(|chain| chain.chain().first())
        .or_else(|| {
            keystore.entries().find_map(|(_, entry)| match entry {
                KeyStoreEntry::Certificate(cert) => Some(cert),
                _ => None,
            })
        })
        .map(|cert| cert.as_der().to_vec())
        .ok_or(CertificateError::MissingCertificate)?;

    let key_der = key_chain
        .map(|chain| chain.key().to_vec())
        .ok_or(CertificateError::MissingKey)?;

    Ok(TlsIdentity {
        certificate_pem: pem::encode(&pem::Pem::new("CERTIFICATE", cert_der)),
        private_key_pem: pem::encode(&pem::Pem::new("PRIVATE KEY", key_der)),
        verify_peer,
    })
}

/// Outcome of the startup certificate bootstrap.
///
/// Loading never fails the process: when the container cannot be used the
/// identity is absent and the failure is kept for reporting, and callers
/// proceed without mutual TLS.
#[derive(Debug, Default)]
pub struct CertificateIdentity {
    identity: Option<TlsIdentity>,
    failure: Option<CertificateError>,
}

impl CertificateIdentity {
    /// mTLS switched off in configuration; nothing is loaded.
    pub fn disabled() -> Self {
        info!("mTLS disabled in configuration");
        Self::default()
    }

    pub fn load(source: CertificateSource, passphrase: &str, verify_peer: bool) -> Self {
        let origin = source.describe();
        debug!(
            source = %origin,
            passphrase_set = !passphrase.is_empty(),
            "loading PKCS#12 client certificate"
        );

        let result = source
            .read()
            .and_then(|der| decode(&der, passphrase, verify_peer));

        match result {
            Ok(identity) => {
                info!(
                    source = %origin,
                    certificate_bytes = identity.certificate_pem.len(),
                    verify_peer,
                    "client certificate loaded"
                );
                Self {
                    identity: Some(identity),
                    failure: None,
                }
            }
            Err(err) => {
                warn!(
                    source = %origin,
                    error = %err,
                    "failed to load client certificate; continuing without mTLS"
                );
                Self {
                    identity: None,
                    failure: Some(err),
                }
            }
        }
    }

    pub fn identity(&self) -> Option<&TlsIdentity> {
        self.identity.as_ref()
    }

    pub fn failure(&self) -> Option<&CertificateError> {
        self.failure.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.identity.is_some()
    }
}
