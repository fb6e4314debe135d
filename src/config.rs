//! Configuration: per-client settings and per-call extraction options.
//!
//! [`ClientConfig`] is fixed for a client's lifetime (credential, endpoint,
//! timeout, transport). [`ExtractOptions`] travel with each call. Both are
//! built through builders so callers only set what they care about.

use crate::error::ValidationError;
use crate::pipeline::transport::Transport;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable consulted when no API key is passed explicitly.
pub const API_KEY_ENV: &str = "PARSEFY_API_KEY";

pub const DEFAULT_BASE_URL: &str = "https://api.parsefy.io";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.85;

/// Upload limit enforced before any network access.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

// ── Per-call options ─────────────────────────────────────────────────────────

/// Options for a single extraction.
///
/// ```rust
/// use parsefy::ExtractOptions;
///
/// let options = ExtractOptions::builder()
///     .confidence_threshold(0.9)
///     .enable_verification(true)
///     .build();
/// assert!(options.enable_verification);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    /// Minimum confidence in `(0, 1]` accepted without escalating to the
    /// fallback tier. Default: 0.85.
    ///
    /// Checked when the request is assembled, so an invalid value fails with
    /// `INVALID_THRESHOLD` before anything is uploaded.
    pub confidence_threshold: f64,

    /// Ask the service to run math verification (sums, tax lines) and report
    /// the checks. Default: false.
    pub enable_verification: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            enable_verification: false,
        }
    }
}

impl ExtractOptions {
    pub fn builder() -> ExtractOptionsBuilder {
        ExtractOptionsBuilder {
            options: Self::default(),
        }
    }
}

#[derive(Debug)]
pub struct ExtractOptionsBuilder {
    options: ExtractOptions,
}

impl ExtractOptionsBuilder {
    pub fn confidence_threshold(mut self, threshold: f64) -> Self {
        self.options.confidence_threshold = threshold;
        self
    }

    pub fn enable_verification(mut self, v: bool) -> Self {
        self.options.enable_verification = v;
        self
    }

    pub fn build(self) -> ExtractOptions {
        self.options
    }
}

// ── Client configuration ─────────────────────────────────────────────────────

/// Settings fixed for the lifetime of a [`crate::Parsefy`] client.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: String,

    /// Service root; requests go to `{base_url}/v1/extract`.
    pub base_url: String,

    /// Per-call deadline measured from dispatch. Default: 60 s.
    pub timeout: Duration,

    pub user_agent: String,

    /// Pre-built transport. Takes precedence over the default HTTP transport;
    /// useful for tests, proxies, or custom middleware.
    pub transport: Option<Arc<dyn Transport>>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("transport", &self.transport.as_ref().map(|_| "<dyn Transport>"))
            .finish()
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    transport: Option<Arc<dyn Transport>>,
}

impl fmt::Debug for ClientConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfigBuilder")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Resolve the credential (explicit value, then `PARSEFY_API_KEY`) and
    /// fill defaults.
    pub fn build(self) -> Result<ClientConfig, ValidationError> {
        let api_key = self
            .api_key
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
            .ok_or(ValidationError::MissingApiKey)?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(ClientConfig {
            api_key,
            base_url,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| format!("parsefy-rust/{}", env!("CARGO_PKG_VERSION"))),
            transport: self.transport,
        })
    }
}
