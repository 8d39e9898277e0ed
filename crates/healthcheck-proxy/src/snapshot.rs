//! Cached result of the last forwarded health check.

use bytes::Bytes;
use http::StatusCode;
use std::time::{Duration, Instant};

/// Immutable status snapshot
///
/// A target client replaces its snapshot wholesale; snapshots are never mutated.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    status: StatusCode,
    content_type: Option<String>,
    body: Option<Bytes>,
    created_at: Instant,
}

impl StatusSnapshot {
    /// Create a snapshot stamped with the current instant
    pub fn new(status: StatusCode, content_type: Option<String>, body: Option<Bytes>) -> Self {
        Self {
            status,
            content_type,
            body,
            created_at: Instant::now(),
        }
    }

    /// Snapshot of a completed forwarded exchange.
    ///
    /// An empty body drops the content type as well.
    pub fn from_response(status: StatusCode, content_type: Option<String>, body: Bytes) -> Self {
        if body.is_empty() {
            Self::new(status, None, None)
        } else {
            Self::new(status, content_type, Some(body))
        }
    }

    /// Snapshot for a forwarded request that timed out
    pub fn timeout() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, None, None)
    }

    /// Snapshot for a forwarded request that failed for any other reason
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some("text/plain".to_string()),
            Some(Bytes::from(message.into())),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// True once more than `expiry` has passed since creation
    pub fn is_expired(&self, expiry: Duration) -> bool {
        self.created_at.elapsed() > expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_drops_content_type() {
        let snapshot =
            StatusSnapshot::from_response(StatusCode::OK, Some("text/html".into()), Bytes::new());
        assert_eq!(snapshot.status(), StatusCode::OK);
        assert!(snapshot.content_type().is_none());
        assert!(snapshot.body().is_none());
    }

    #[test]
    fn test_response_with_body() {
        let snapshot = StatusSnapshot::from_response(
            StatusCode::OK,
            Some("text/html".into()),
            Bytes::from_static(b"OK"),
        );
        assert_eq!(snapshot.content_type(), Some("text/html"));
        assert_eq!(snapshot.body().map(|b| b.as_ref()), Some(&b"OK"[..]));
    }

    #[test]
    fn test_timeout_and_failure_shapes() {
        let timeout = StatusSnapshot::timeout();
        assert_eq!(timeout.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(timeout.content_type().is_none());
        assert!(timeout.body().is_none());

        let failure = StatusSnapshot::failure("connection refused");
        assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failure.content_type(), Some("text/plain"));
        assert_eq!(
            failure.body().map(|b| b.as_ref()),
            Some(&b"connection refused"[..])
        );
    }

    #[test]
    fn test_expiry() {
        let snapshot = StatusSnapshot::timeout();
        assert!(!snapshot.is_expired(Duration::from_secs(60)));

        std::thread::sleep(Duration::from_millis(5));
        assert!(snapshot.is_expired(Duration::from_millis(1)));
        assert!(snapshot.is_expired(Duration::ZERO));
    }
}
