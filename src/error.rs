//! Error types for the parsefy client.
//!
//! Three failure families, three types:
//!
//! * [`ValidationError`] (local): the caller's input is wrong (missing
//!   file, unsupported format, bad threshold, closed client). Always raised
//!   before any network access and fixed by changing the input.
//!
//! * [`ApiError`] (remote): the round trip failed (HTTP 4xx/5xx,
//!   timeout, malformed envelope) or the server's answer broke the contract
//!   (`SCHEMA_MISMATCH`, `INTERNAL_INCONSISTENCY`). The library never retries;
//!   every attempt is billed.
//!
//! * [`ContractError`] (declaration): a schema cannot be compiled into a
//!   field contract. Raised by [`crate::contract::Contract::compile`].
//!
//! A business-level extraction failure ("could not extract confidently") is
//! *not* an error here: it is ordinary data carried in
//! [`crate::output::ExtractResult`] as an [`crate::output::ExtractionError`].

use crate::output::ExtractionMetadata;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = ParsefyError> = std::result::Result<T, E>;

/// Every error a parsefy operation can return.
#[derive(Debug, Error)]
pub enum ParsefyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl ParsefyError {
    /// Stable machine-readable code, e.g. `FILE_NOT_FOUND` or `TIMEOUT`.
    pub fn code(&self) -> &'static str {
        match self {
            ParsefyError::Validation(e) => e.code(),
            ParsefyError::Api(e) => e.code.as_str(),
            ParsefyError::Contract(e) => e.code(),
        }
    }

    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            ParsefyError::Api(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            ParsefyError::Validation(e) => Some(e),
            _ => None,
        }
    }
}

// ── Client-side validation ──────────────────────────────────────────────────

/// Pre-flight failures. None of these ever reach the network.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Path input does not exist.
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Path exists but could not be read (permissions, is a directory, …).
    #[error("Failed to read '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Extension is not `.pdf` or `.docx`.
    #[error("Unsupported file type: '{extension}'. Only PDF and DOCX are supported.")]
    UnsupportedFileType { extension: String },

    /// Input contains zero bytes.
    #[error("File is empty.")]
    EmptyFile,

    /// Input exceeds the upload limit. `size` is `None` for streams, which
    /// are read no further than one byte past `max`.
    #[error("File size{} exceeds maximum allowed size ({max} bytes).", size_suffix(.size))]
    FileTooLarge { size: Option<u64>, max: u64 },

    /// `confidence_threshold` outside `(0, 1]` (or NaN).
    #[error("confidence_threshold must be in (0, 1], got {value}")]
    InvalidThreshold { value: f64 },

    /// The client's session was released by `close()`.
    #[error("Client is closed; create a new client to issue further requests")]
    ClientClosed,

    /// No API key passed and `PARSEFY_API_KEY` is unset.
    #[error("API key is required. Pass it directly or set PARSEFY_API_KEY environment variable.")]
    MissingApiKey,
}

fn size_suffix(size: &Option<u64>) -> String {
    size.map(|s| format!(" ({s} bytes)")).unwrap_or_default()
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::FileNotFound { .. } => "FILE_NOT_FOUND",
            ValidationError::Unreadable { .. } => "FILE_UNREADABLE",
            ValidationError::UnsupportedFileType { .. } => "UNSUPPORTED_FILE_TYPE",
            ValidationError::EmptyFile => "EMPTY_FILE",
            ValidationError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            ValidationError::InvalidThreshold { .. } => "INVALID_THRESHOLD",
            ValidationError::ClientClosed => "CLIENT_CLOSED",
            ValidationError::MissingApiKey => "MISSING_API_KEY",
        }
    }
}

// ── Transport / protocol ────────────────────────────────────────────────────

/// Classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorCode {
    /// Non-2xx HTTP status.
    Http,
    /// The per-call deadline expired before a response arrived.
    Timeout,
    /// Connection, TLS or body-transfer failure.
    Network,
    /// 2xx body that is not a valid envelope.
    MalformedResponse,
    /// Returned data does not satisfy the field contract.
    SchemaMismatch,
    /// Server-reported structure contradicts itself (e.g. verification counts).
    InternalInconsistency,
}

impl ApiErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorCode::Http => "HTTP_ERROR",
            ApiErrorCode::Timeout => "TIMEOUT",
            ApiErrorCode::Network => "NETWORK_ERROR",
            ApiErrorCode::MalformedResponse => "MALFORMED_RESPONSE",
            ApiErrorCode::SchemaMismatch => "SCHEMA_MISMATCH",
            ApiErrorCode::InternalInconsistency => "INTERNAL_INCONSISTENCY",
        }
    }
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed or unusable round trip to the extraction service.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    /// HTTP status when a response was received; `None` for timeouts and
    /// connection failures.
    pub status_code: Option<u16>,
    pub code: ApiErrorCode,
    pub message: String,
    /// Decoded response body, when there was one and it was JSON.
    pub response: Option<serde_json::Value>,
    /// Billing metadata from a 2xx envelope that was rejected after parsing.
    pub metadata: Option<ExtractionMetadata>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            code,
            message: message.into(),
            response: None,
            metadata: None,
        }
    }

    pub fn http(
        status: u16,
        message: impl Into<String>,
        response: Option<serde_json::Value>,
    ) -> Self {
        Self {
            status_code: Some(status),
            response,
            ..Self::new(ApiErrorCode::Http, message)
        }
    }

    pub fn timeout(elapsed_ms: u64) -> Self {
        Self::new(
            ApiErrorCode::Timeout,
            format!("Request timed out after {elapsed_ms}ms"),
        )
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Network, message)
    }

    pub fn malformed(status: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status),
            ..Self::new(ApiErrorCode::MalformedResponse, message)
        }
    }

    pub fn schema_mismatch(status: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status),
            ..Self::new(ApiErrorCode::SchemaMismatch, message)
        }
    }

    pub fn inconsistency(status: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status),
            ..Self::new(ApiErrorCode::InternalInconsistency, message)
        }
    }

    pub(crate) fn with_metadata(mut self, metadata: ExtractionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.code == ApiErrorCode::Timeout
    }
}

// ── Schema compilation ──────────────────────────────────────────────────────

/// A schema declaration that cannot be turned into a field contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// The declared type has no wire representation.
    #[error("Field '{path}' has unsupported type '{type_name}'")]
    UnsupportedType { path: String, type_name: String },

    /// A schema contains itself without a list or optional wrapper in between.
    #[error(
        "Cyclic schema: {} (break the cycle with a list or optional field)",
        cycle.join(" -> ")
    )]
    CyclicSchema { cycle: Vec<String> },

    /// `Nested(name)` points at a schema that was never defined.
    #[error("Field '{path}' references unknown schema '{name}'")]
    UnknownSchema { path: String, name: String },

    /// Two fields of one schema share a name.
    #[error("Schema '{schema}' declares field '{field}' more than once")]
    DuplicateField { schema: String, field: String },

    /// Two different schemas are declared under one name.
    #[error("Schema '{name}' is declared more than once with different fields")]
    DuplicateSchema { name: String },

    /// A schema with no fields would request nothing.
    #[error("Schema '{schema}' has no fields")]
    EmptySchema { schema: String },

    /// The compiled contract could not be serialised for the wire.
    #[error("Failed to serialise contract for '{schema}': {detail}")]
    Serialization { schema: String, detail: String },
}

impl ContractError {
    pub fn code(&self) -> &'static str {
        match self {
            ContractError::UnsupportedType { .. } => "UNSUPPORTED_TYPE",
            ContractError::CyclicSchema { .. } => "CYCLIC_SCHEMA",
            ContractError::UnknownSchema { .. } => "UNKNOWN_SCHEMA",
            ContractError::DuplicateField { .. } => "DUPLICATE_FIELD",
            ContractError::DuplicateSchema { .. } => "DUPLICATE_SCHEMA",
            ContractError::EmptySchema { .. } => "EMPTY_SCHEMA",
            ContractError::Serialization { .. } => "CONTRACT_SERIALIZATION",
        }
    }
}
