//! The client: owns the shared session and runs extractions.
//!
//! ## Session lifetime
//!
//! A [`Parsefy`] handle is a reference-counted pointer to one session: the
//! pooled transport plus the per-call timeout. Cloning the handle shares the
//! session. The transport is released when [`Parsefy::close`] is called or
//! when the last handle goes out of scope. Calls already in flight keep
//! their own reference and finish normally; calls started after `close`
//! fail with `CLIENT_CLOSED` before touching the network.
//!
//! ## Concurrency
//!
//! There is no internal worker pool or queue. Each [`Parsefy::extract`] is a
//! single request/response that suspends only while waiting on the network.
//! To run several at once, issue several calls and join them; completion
//! order is unspecified, so correlate results by input position:
//!
//! ```rust,no_run
//! use parsefy::{Contract, ExtractOptions, Field, Parsefy, Schema, TypeDescriptor};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Parsefy::new(None)?; // PARSEFY_API_KEY
//! let contract = Contract::compile(
//!     &Schema::new("Receipt").field(Field::new("total", TypeDescriptor::number())),
//! )?;
//! let options = ExtractOptions::default();
//!
//! let (a, b) = tokio::join!(
//!     client.extract::<serde_json::Value>("a.pdf", &contract, &options),
//!     client.extract::<serde_json::Value>("b.pdf", &contract, &options),
//! );
//! println!("{:?}\n{:?}", a?.data(), b?.data());
//! # Ok(())
//! # }
//! ```
//!
//! Every call has its own deadline measured from dispatch. A call that times
//! out is dropped on its own; siblings on the same session are unaffected.

use crate::config::{ClientConfig, ExtractOptions};
use crate::contract::Contract;
use crate::error::{ApiError, ParsefyError, Result, ValidationError};
use crate::output::ExtractResult;
use crate::pipeline::input::FileInput;
use crate::pipeline::transport::{HttpTransport, Transport};
use crate::pipeline::{reconcile, request};
use crate::schema::Schema;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Parsefy API client.
#[derive(Clone)]
pub struct Parsefy {
    session: Arc<Session>,
}

struct Session {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    timeout: Duration,
}

impl fmt::Debug for Parsefy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parsefy")
            .field("timeout", &self.session.timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Parsefy {
    /// Client with default settings. `None` reads `PARSEFY_API_KEY`.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let mut builder = ClientConfig::builder();
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        Self::with_config(builder.build()?)
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> = match &config.transport {
            Some(t) => Arc::clone(t),
            None => Arc::new(HttpTransport::new(&config)?),
        };
        debug!(base_url = %config.base_url, timeout = ?config.timeout, "session opened");
        Ok(Self {
            session: Arc::new(Session {
                transport: RwLock::new(Some(transport)),
                timeout: config.timeout,
            }),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.session.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.session
            .transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Release the session for every handle sharing it. Idempotent.
    pub fn close(&self) {
        let released = self
            .session
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if released.is_some() {
            debug!("session closed");
        }
    }

    fn acquire(&self) -> Result<Arc<dyn Transport>, ValidationError> {
        self.session
            .transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
            .ok_or(ValidationError::ClientClosed)
    }

    /// Extract structured data from a document.
    ///
    /// # Errors
    /// - [`ValidationError`] for closed clients and bad input (missing file,
    ///   unsupported type, oversized, invalid threshold). Nothing is sent.
    /// - [`ApiError`] for HTTP errors, timeouts, malformed envelopes and
    ///   data that breaks the contract.
    ///
    /// A business-level failure (e.g. `LOW_CONFIDENCE`) is **not** an error:
    /// it comes back as `Ok` with [`ExtractResult::error`] set.
    pub async fn extract<T: DeserializeOwned>(
        &self,
        file: impl Into<FileInput>,
        contract: &Contract,
        options: &ExtractOptions,
    ) -> Result<ExtractResult<T>> {
        let transport = self.acquire()?;
        let request = request::assemble(file.into(), contract, options)?;

        info!(
            schema = contract.root(),
            filename = %request.file.filename,
            size = request.file.bytes.len(),
            verification = request.enable_verification,
            "dispatching extraction"
        );

        let start = Instant::now();
        let raw = match tokio::time::timeout(self.session.timeout, transport.send(&request)).await {
            Ok(sent) => sent?,
            Err(_) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                warn!(filename = %request.file.filename, elapsed_ms, "extraction timed out");
                return Err(ApiError::timeout(elapsed_ms).into());
            }
        };
        drop(transport);

        let result = reconcile::reconcile::<T>(
            raw.status,
            &raw.body,
            contract,
            request.enable_verification,
        )?;

        info!(
            filename = %request.file.filename,
            status = raw.status,
            success = result.is_success(),
            credits = result.metadata().credits,
            fallback_triggered = result.metadata().fallback_triggered,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "extraction complete"
        );
        Ok(result)
    }

    /// Compile `schema` and extract in one step.
    ///
    /// Convenient for one-off calls; when extracting repeatedly with the same
    /// schema, compile a [`Contract`] once and use [`Parsefy::extract`].
    pub async fn extract_with_schema<T: DeserializeOwned>(
        &self,
        file: impl Into<FileInput>,
        schema: &Schema,
        options: &ExtractOptions,
    ) -> Result<ExtractResult<T>> {
        let contract = Contract::compile(schema)?;
        self.extract(file, &contract, options).await
    }

    /// Blocking wrapper around [`Parsefy::extract`].
    ///
    /// Drives the call on a private current-thread runtime. Must not be
    /// called from inside an async context.
    pub fn extract_blocking<T: DeserializeOwned>(
        &self,
        file: impl Into<FileInput>,
        contract: &Contract,
        options: &ExtractOptions,
    ) -> Result<ExtractResult<T>> {
        // Fail fast without spinning up a runtime.
        self.acquire()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                ParsefyError::from(ApiError::network(format!(
                    "failed to create tokio runtime: {e}"
                )))
            })?;
        runtime.block_on(self.extract(file, contract, options))
    }
}
