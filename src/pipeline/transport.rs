//! Transport: deliver an assembled request and hand back the raw response.
//!
//! The only stage with network I/O. It knows nothing about envelopes or
//! contracts; status and body go to the reconciler untouched. Deadlines are
//! owned by the client, which wraps every [`Transport::send`] in its own
//! timeout, so implementations need not enforce one.

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::pipeline::request::ExtractRequest;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use tracing::debug;

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        is_success_status(self.status)
    }
}

/// Whether `status` is in the 2xx range.
pub fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Something that can carry an [`ExtractRequest`] to the service.
///
/// Implementations are shared by every in-flight call of a client, so they
/// must tolerate concurrent `send`s.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ExtractRequest) -> Result<RawResponse, ApiError>;
}

/// Default transport: multipart POST over a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| {
                ApiError::network("API key contains characters not allowed in an HTTP header")
            })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/extract", config.base_url),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn map_reqwest(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::new(crate::error::ApiErrorCode::Timeout, e.to_string())
    } else {
        ApiError::network(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ExtractRequest) -> Result<RawResponse, ApiError> {
        let file = Part::bytes(request.file.bytes.clone())
            .file_name(request.file.filename.clone())
            .mime_str(request.file.mime_type)
            .map_err(map_reqwest)?;

        let form = request
            .form_fields()
            .into_iter()
            .fold(Form::new().part("file", file), |form, (name, value)| form.text(name, value));

        debug!(endpoint = %self.endpoint, filename = %request.file.filename, "POST extract");

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest)?;

        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}
