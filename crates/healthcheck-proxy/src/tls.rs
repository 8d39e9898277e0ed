//! TLS trust and identity policy for forwarded requests.
//!
//! The destination of a forwarded request is always `localhost`, so server
//! certificates are accepted without chain or name verification. The only
//! choice left is whether the client presents the node's own identity, which
//! is needed when the destination listener requires client authentication.

use crate::error::{ForwardError, ProxyError};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Environment variable naming the node TLS configuration file
pub const TLS_CONFIG_FILE_ENV: &str = "HEALTHCHECK_PROXY_TLS_CONFIG_FILE";

/// Location of this node's private key and certificate chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub private_key: PathBuf,
    pub certificates: PathBuf,
}

/// Source of the node identity
#[cfg_attr(test, mockall::automock)]
pub trait IdentityProvider: Send + Sync {
    fn node_identity(&self) -> Option<NodeIdentity>;
}

impl IdentityProvider for NodeIdentity {
    fn node_identity(&self) -> Option<NodeIdentity> {
        Some(self.clone())
    }
}

/// Provider for nodes without any identity material
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

impl IdentityProvider for NoIdentity {
    fn node_identity(&self) -> Option<NodeIdentity> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct TlsConfigFile {
    files: TlsConfigFiles,
}

#[derive(Debug, Deserialize)]
struct TlsConfigFiles {
    #[serde(rename = "private-key")]
    private_key: PathBuf,
    certificates: PathBuf,
}

/// Identity read from the JSON file named by [`TLS_CONFIG_FILE_ENV`]
#[derive(Debug, Clone, Default)]
pub struct EnvIdentityProvider {
    identity: Option<NodeIdentity>,
}

impl EnvIdentityProvider {
    /// Read the TLS configuration file, if the environment names one
    pub fn from_env() -> Result<Self, ProxyError> {
        match std::env::var_os(TLS_CONFIG_FILE_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Read a TLS configuration file of the form
    /// `{"files": {"private-key": "...", "certificates": "..."}}`
    pub fn from_file(path: &Path) -> Result<Self, ProxyError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ProxyError::TlsConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: TlsConfigFile =
            serde_json::from_str(&contents).map_err(|source| ProxyError::TlsConfigFormat {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            identity: Some(NodeIdentity {
                private_key: parsed.files.private_key,
                certificates: parsed.files.certificates,
            }),
        })
    }
}

impl IdentityProvider for EnvIdentityProvider {
    fn node_identity(&self) -> Option<NodeIdentity> {
        self.identity.clone()
    }
}

/// Trust and identity policy for one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Accept any server certificate, present no client certificate
    TrustAll,
    /// Accept any server certificate, present the node identity
    ClientIdentity(NodeIdentity),
}

impl TlsPolicy {
    pub fn presents_identity(&self) -> bool {
        matches!(self, TlsPolicy::ClientIdentity(_))
    }

    /// Build the rustls client configuration for this policy.
    ///
    /// Identity files are read here, so this must not run before they exist.
    pub fn client_config(&self) -> Result<ClientConfig, ForwardError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = Arc::new(TrustAnyServer::new(&provider));

        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let config = match self {
            TlsPolicy::TrustAll => builder.with_no_client_auth(),
            TlsPolicy::ClientIdentity(identity) => {
                let certs = load_certificates(&identity.certificates)?;
                let key = load_private_key(&identity.private_key)?;
                debug!(
                    certificates = %identity.certificates.display(),
                    chain_len = certs.len(),
                    "Loaded node identity for client authentication"
                );
                builder.with_client_auth_cert(certs, key)?
            }
        };

        Ok(config)
    }
}

/// Read every certificate from a PEM file
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ForwardError> {
    let file = File::open(path).map_err(|e| identity_error(path, e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| identity_error(path, e))?;

    if certs.is_empty() {
        return Err(identity_error(path, "no certificates found"));
    }
    Ok(certs)
}

/// Read the first private key from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ForwardError> {
    let file = File::open(path).map_err(|e| identity_error(path, e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| identity_error(path, e))?
        .ok_or_else(|| identity_error(path, "no private key found"))
}

fn identity_error(path: &Path, err: impl std::fmt::Display) -> ForwardError {
    ForwardError::Identity(format!("{}: {}", path.display(), err))
}

/// Accepts any server certificate chain for any name.
///
/// Handshake signatures are still verified so the peer must hold the key of
/// the certificate it presents.
#[derive(Debug)]
struct TrustAnyServer {
    algorithms: WebPkiSupportedAlgorithms,
}

impl TrustAnyServer {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for TrustAnyServer {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
