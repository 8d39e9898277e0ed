//! TLS termination for secured listeners.

use crate::config::ListenerTlsSettings;
use common::{Error, Result};
use healthcheck_proxy::ClientAuth;
use healthcheck_proxy::tls::{load_certificates, load_private_key};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::sync::Arc;

/// Build the rustls server configuration of one listener.
///
/// With `want` a client may connect without a certificate; with `need` the
/// handshake fails unless it presents one issued by `ca_certificates`.
pub fn server_config(tls: &ListenerTlsSettings) -> Result<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let certs = load_certificates(&tls.certificate).map_err(Error::tls)?;
    let key = load_private_key(&tls.private_key).map_err(Error::tls)?;

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(Error::tls)?;

    let builder = match tls.client_auth {
        ClientAuth::None => builder.with_no_client_auth(),
        ClientAuth::Want | ClientAuth::Need => {
            let ca_path = tls.ca_certificates.as_ref().ok_or_else(|| {
                Error::config(format!(
                    "client_auth {} requires ca_certificates",
                    tls.client_auth
                ))
            })?;

            let mut roots = RootCertStore::empty();
            for cert in load_certificates(ca_path).map_err(Error::tls)? {
                roots.add(cert).map_err(Error::tls)?;
            }

            let mut verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            if tls.client_auth == ClientAuth::Want {
                verifier = verifier.allow_unauthenticated();
            }
            builder.with_client_cert_verifier(verifier.build().map_err(Error::tls)?)
        }
    };

    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(Error::tls)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_certificate_file() {
        let settings = ListenerTlsSettings {
            certificate: PathBuf::from("/nonexistent/cert.pem"),
            private_key: PathBuf::from("/nonexistent/key.pem"),
            ca_certificates: None,
            client_auth: ClientAuth::None,
        };

        let err = server_config(&settings).unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
        assert!(err.to_string().contains("/nonexistent/cert.pem"));
    }
}
