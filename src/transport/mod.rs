use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

use crate::security::certificate::TlsIdentity;

/// Build the shared HTTP client for the issuer and the statement API.
///
/// With an identity the client presents it during the TLS handshake. An
/// identity that the TLS stack rejects is dropped with a warning and the
/// client is built without one.
pub fn build_client(identity: Option<&TlsIdentity>, timeout: Duration) -> Result<Client> {
    let base = || Client::builder().timeout(timeout);

    let Some(identity) = identity else {
        return base().build().context("building http client");
    };

    match reqwest::Identity::from_pem(&identity.pem_bundle()) {
        Ok(tls_identity) => {
            info!(
                verify_peer = identity.verify_peer,
                timeout_secs = timeout.as_secs(),
                "http client configured with client certificate"
            );
            base()
                .use_rustls_tls()
                .identity(tls_identity)
                .danger_accept_invalid_certs(!identity.verify_peer)
                .build()
                .context("building mTLS http client")
        }
        Err(err) => {
            warn!(error = %err, "client certificate rejected by TLS stack; continuing without mTLS");
            base().build().context("building http client")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::certificate::decode;

    #[test]
    fn test_build_client_without_identity() {
        assert!(build_client(None, Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn test_build_client_with_fixture_identity() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/client.p12");
        let der = std::fs::read(path).unwrap();
        let identity = decode(&der, "changeit", true).unwrap();
        assert!(build_client(Some(&identity), Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_build_client_with_unusable_identity_falls_back() {
        let identity = TlsIdentity {
            certificate_pem: "not a pem".into(),
            private_key_pem: "also not a pem".into(),
            verify_peer: true,
        };
        assert!(build_client(Some(&identity), Duration::from_secs(5)).is_ok());
    }
}
