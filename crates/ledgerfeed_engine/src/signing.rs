//! Request signing for outbound HTTP calls.
//!
//! Credentials are out of scope for the engine: a [`RequestSigner`] stamps
//! whatever headers the downstream service expects onto a built request.

use crate::error::{SinkError, SinkResult};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Request;

/// Stamps credentials onto outgoing requests.
#[async_trait]
pub trait RequestSigner: Send + Sync {
    /// Signs the request in place.
    async fn sign(&self, request: &mut Request) -> SinkResult<()>;
}

/// A signer that leaves requests untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsigned;

#[async_trait]
impl RequestSigner for Unsigned {
    async fn sign(&self, _request: &mut Request) -> SinkResult<()> {
        Ok(())
    }
}

/// A signer that adds fixed headers, such as a pre-issued bearer token.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl StaticHeaders {
    /// Creates an empty signer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Signing`] if the name or value is not a valid
    /// HTTP header.
    pub fn with_header(mut self, name: &str, value: &str) -> SinkResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SinkError::Signing(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| SinkError::Signing(format!("invalid value for {name}: {e}")))?;
        self.headers.push((name, value));
        Ok(self)
    }
}

#[async_trait]
impl RequestSigner for StaticHeaders {
    async fn sign(&self, request: &mut Request) -> SinkResult<()> {
        let headers = request.headers_mut();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, Url};

    fn request() -> Request {
        let url = Url::parse("http://localhost:9200/licence").unwrap();
        Request::new(Method::GET, url)
    }

    #[tokio::test]
    async fn unsigned_is_noop() {
        let mut req = request();
        Unsigned.sign(&mut req).await.unwrap();
        assert!(req.headers().is_empty());
    }

    #[tokio::test]
    async fn static_headers_are_stamped() {
        let signer = StaticHeaders::new()
            .with_header("authorization", "Bearer t0ken")
            .unwrap();
        let mut req = request();
        signer.sign(&mut req).await.unwrap();
        assert_eq!(req.headers()["authorization"], "Bearer t0ken");
    }

    #[test]
    fn invalid_header_is_rejected() {
        let err = StaticHeaders::new().with_header("bad header", "x").unwrap_err();
        assert!(matches!(err, SinkError::Signing(_)));
    }
}
