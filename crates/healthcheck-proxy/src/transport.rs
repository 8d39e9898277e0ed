//! HTTPS transport used for forwarded health checks.
//!
//! Every forwarded request opens its own connection to `localhost`, optionally
//! writes a PROXY protocol header, performs the TLS handshake and issues a
//! single HTTP/1.1 GET. Connection driver tasks are bound to the owning
//! target client's shutdown token.

use crate::error::ForwardError;
use crate::proxy_protocol::ProxyHeaderV1;
use crate::tls::TlsPolicy;
use crate::types::PROXY_USER_AGENT;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Empty, LengthLimitError, Limited};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DESTINATION_HOST: &str = "localhost";

/// Largest response body accepted from a destination
pub const MAX_RESPONSE_BODY: usize = 2 * 1024 * 1024;

/// Response of a forwarded request
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    pub status: StatusCode,
    /// Media type of the response, parameters stripped
    pub media_type: Option<String>,
    pub body: Bytes,
}

/// Connection factory for one destination
pub struct Transport {
    connector: TlsConnector,
    server_name: ServerName<'static>,
    timeout: Duration,
    proxy_protocol: bool,
    shutdown: CancellationToken,
}

impl Transport {
    /// Build a transport for the given policy.
    ///
    /// Reads identity material from disk when the policy presents one.
    pub fn build(
        policy: &TlsPolicy,
        timeout: Duration,
        proxy_protocol: bool,
        shutdown: CancellationToken,
    ) -> Result<Self, ForwardError> {
        let config = policy.client_config()?;
        let server_name = ServerName::try_from(DESTINATION_HOST)
            .map_err(|e| ForwardError::Identity(e.to_string()))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
            timeout,
            proxy_protocol,
            shutdown,
        })
    }

    /// GET `path` from `https://localhost:<port>`, bounded by the transport timeout
    pub async fn get(&self, port: u16, path: &str) -> Result<ForwardedResponse, ForwardError> {
        if self.shutdown.is_cancelled() {
            return Err(ForwardError::Closed);
        }

        match tokio::time::timeout(self.timeout, self.exchange(port, path)).await {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Timeout(self.timeout)),
        }
    }

    /// Release every open connection and refuse further requests
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn exchange(&self, port: u16, path: &str) -> Result<ForwardedResponse, ForwardError> {
        let mut stream = TcpStream::connect((DESTINATION_HOST, port))
            .await
            .map_err(ForwardError::Connect)?;
        stream.set_nodelay(true).map_err(ForwardError::Connect)?;

        if self.proxy_protocol {
            let header = ProxyHeaderV1::new(
                stream.local_addr().map_err(ForwardError::Connect)?,
                stream.peer_addr().map_err(ForwardError::Connect)?,
            );
            stream
                .write_all(header.encode().as_bytes())
                .await
                .map_err(ForwardError::Connect)?;
        }

        let tls = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(ForwardError::Handshake)?;

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(tls)).await?;

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = connection => {
                    if let Err(e) = result {
                        debug!(port, error = %e, "Forwarded connection ended with error");
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!(port, "Forwarded connection dropped on shutdown");
                }
            }
        });

        let request = Request::get(path)
            .header(HOST, format!("{}:{}", DESTINATION_HOST, port))
            .header(USER_AGENT, PROXY_USER_AGENT)
            .body(Empty::<Bytes>::new())?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(media_type);
        let body = Limited::new(response.into_body(), MAX_RESPONSE_BODY)
            .collect()
            .await
            .map_err(|e| match e.downcast::<hyper::Error>() {
                Ok(e) => ForwardError::Http(*e),
                Err(e) if e.is::<LengthLimitError>() => {
                    ForwardError::BodyTooLarge(MAX_RESPONSE_BODY)
                }
                Err(e) => ForwardError::Body(e.to_string()),
            })?
            .to_bytes();

        Ok(ForwardedResponse {
            status,
            media_type,
            body,
        })
    }
}

/// Media type of a Content-Type value, without parameters
fn media_type(content_type: &str) -> Option<String> {
    let media = content_type.split(';').next().unwrap_or_default().trim();
    if media.is_empty() {
        None
    } else {
        Some(media.to_string())
    }
}
