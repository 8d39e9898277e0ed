//! Shared test harness: local TLS destinations with controllable behavior.

#![allow(dead_code)]

use bytes::Bytes;
use healthcheck_proxy::NodeIdentity;
use healthcheck_proxy::proxy_protocol::{self, ProxyHeaderV1};
use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

static FILE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Test CA plus one leaf certificate usable as both server and client identity
pub struct TestPki {
    pub ca_der: CertificateDer<'static>,
    pub leaf_der: CertificateDer<'static>,
    pub leaf_key_der: Vec<u8>,
    pub leaf_pem: String,
    pub leaf_key_pem: String,
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().expect("ca key");
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("ca params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "healthcheck-proxy test ca");
        let ca_cert = ca_params.self_signed(&ca_key).expect("ca cert");

        let leaf_key = KeyPair::generate().expect("leaf key");
        let mut leaf_params =
            CertificateParams::new(vec!["localhost".to_string()]).expect("leaf params");
        leaf_params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let leaf = leaf_params
            .signed_by(&leaf_key, &ca_cert, &ca_key)
            .expect("leaf cert");

        Self {
            ca_der: ca_cert.der().clone(),
            leaf_der: leaf.der().clone(),
            leaf_key_der: leaf_key.serialize_der(),
            leaf_pem: leaf.pem(),
            leaf_key_pem: leaf_key.serialize_pem(),
        }
    }

    /// Write the leaf certificate and key to disk as a node identity
    pub fn write_identity(&self) -> NodeIdentity {
        let certificates = temp_file("cert.pem");
        let private_key = temp_file("key.pem");
        std::fs::write(&certificates, &self.leaf_pem).expect("write cert");
        std::fs::write(&private_key, &self.leaf_key_pem).expect("write key");
        NodeIdentity {
            private_key,
            certificates,
        }
    }

    fn server_config(&self, require_client_auth: bool) -> rustls::ServerConfig {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .expect("protocol versions");

        let builder = if require_client_auth {
            let mut roots = RootCertStore::empty();
            roots.add(self.ca_der.clone()).expect("add ca");
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .expect("client verifier");
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.leaf_key_der.clone()));
        builder
            .with_single_cert(vec![self.leaf_der.clone()], key)
            .expect("server cert")
    }
}

pub fn temp_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "healthcheck-proxy-test-{}-{}-{}",
        std::process::id(),
        FILE_COUNTER.fetch_add(1, Ordering::Relaxed),
        name
    ))
}

/// How a destination answers
#[derive(Clone)]
pub struct DestinationBuilder {
    status: StatusCode,
    content_type: Option<&'static str>,
    body: &'static [u8],
    delay: Duration,
    require_client_auth: bool,
    expect_proxy_header: bool,
}

impl Default for DestinationBuilder {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            content_type: Some("text/html"),
            body: b"OK",
            delay: Duration::ZERO,
            require_client_auth: false,
            expect_proxy_header: false,
        }
    }
}

impl DestinationBuilder {
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn content_type(mut self, content_type: Option<&'static str>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn body(mut self, body: &'static [u8]) -> Self {
        self.body = body;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn require_client_auth(mut self) -> Self {
        self.require_client_auth = true;
        self
    }

    pub fn expect_proxy_header(mut self) -> Self {
        self.expect_proxy_header = true;
        self
    }

    pub async fn spawn(self, pki: &TestPki) -> Destination {
        let acceptor = TlsAcceptor::from(Arc::new(pki.server_config(self.require_client_auth)));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();

        let requests = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let proxy_headers = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let state = DestinationState {
            behavior: self,
            requests: Arc::clone(&requests),
            seen: Arc::clone(&seen),
            proxy_headers: Arc::clone(&proxy_headers),
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let acceptor = acceptor.clone();
                        let state = state.clone();
                        tokio::spawn(async move { state.serve(stream, acceptor).await });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Destination {
            port,
            requests,
            seen,
            proxy_headers,
            shutdown_tx: Some(shutdown_tx),
        }
    }
}

#[derive(Clone)]
struct DestinationState {
    behavior: DestinationBuilder,
    requests: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    proxy_headers: Arc<Mutex<Vec<ProxyHeaderV1>>>,
}

impl DestinationState {
    async fn serve(self, mut stream: tokio::net::TcpStream, acceptor: TlsAcceptor) {
        if self.behavior.expect_proxy_header {
            match proxy_protocol::read_header(&mut stream).await {
                Ok(header) => self.proxy_headers.lock().unwrap().push(header),
                Err(_) => return,
            }
        }

        let Ok(tls) = acceptor.accept(stream).await else {
            return;
        };

        let service = service_fn(move |request: Request<Incoming>| {
            let state = self.clone();
            async move { Ok::<_, Infallible>(state.respond(request).await) }
        });

        let _ = hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(tls), service)
            .await;
    }

    async fn respond(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(SeenRequest {
            path: request.uri().path().to_string(),
            user_agent: request
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });

        if !self.behavior.delay.is_zero() {
            tokio::time::sleep(self.behavior.delay).await;
        }

        let mut response = Response::new(Full::new(Bytes::from_static(self.behavior.body)));
        *response.status_mut() = self.behavior.status;
        if let Some(content_type) = self.behavior.content_type {
            response
                .headers_mut()
                .insert(CONTENT_TYPE, content_type.parse().unwrap());
        }
        response
    }
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub user_agent: Option<String>,
}

/// A running destination listener
pub struct Destination {
    pub port: u16,
    requests: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    proxy_headers: Arc<Mutex<Vec<ProxyHeaderV1>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl Destination {
    pub fn builder() -> DestinationBuilder {
        DestinationBuilder::default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn proxy_headers(&self) -> Vec<ProxyHeaderV1> {
        self.proxy_headers.lock().unwrap().clone()
    }
}

impl Drop for Destination {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("local addr").port()
}
