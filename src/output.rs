//! Result types returned by an extraction.
//!
//! Everything here is built exactly once by the response reconciler and
//! never mutated afterwards. Types that carry an invariant keep their
//! fields private and expose accessors; plain records have public fields.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Business-level extraction failure reported inside a 2xx response.
///
/// This is the "fail loudly but not exceptionally" outcome: the service
/// could not extract the document confidently. It is data, not a raised
/// error, so batch callers can inspect it without fault handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ExtractionError {
    pub code: String,
    pub message: String,
}

/// Success payload XOR business error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<T> {
    Data(T),
    Error(ExtractionError),
}

/// Result of one extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractResult<T = serde_json::Value> {
    outcome: Outcome<T>,
    meta: Option<ExtractionMeta>,
    verification: Option<Verification>,
    metadata: ExtractionMetadata,
}

impl<T> ExtractResult<T> {
    pub(crate) fn success(
        data: T,
        meta: Option<ExtractionMeta>,
        verification: Option<Verification>,
        metadata: ExtractionMetadata,
    ) -> Self {
        Self {
            outcome: Outcome::Data(data),
            meta,
            verification,
            metadata,
        }
    }

    pub(crate) fn failure(error: ExtractionError, metadata: ExtractionMetadata) -> Self {
        Self {
            outcome: Outcome::Error(error),
            meta: None,
            verification: None,
            metadata,
        }
    }

    pub fn outcome(&self) -> &Outcome<T> {
        &self.outcome
    }

    pub fn data(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Data(d) => Some(d),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ExtractionError> {
        match &self.outcome {
            Outcome::Error(e) => Some(e),
            Outcome::Data(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Data(_))
    }

    /// Confidence block; present only on success when the service sent one.
    pub fn meta(&self) -> Option<&ExtractionMeta> {
        self.meta.as_ref()
    }

    /// Verification verdict; present only when verification was requested.
    pub fn verification(&self) -> Option<&Verification> {
        self.verification.as_ref()
    }

    /// Processing/billing metadata; always present.
    pub fn metadata(&self) -> &ExtractionMetadata {
        &self.metadata
    }

    pub fn into_data(self) -> Option<T> {
        match self.outcome {
            Outcome::Data(d) => Some(d),
            Outcome::Error(_) => None,
        }
    }

    /// Treat a business error as a Rust error, for callers who want `?`.
    pub fn into_result(self) -> Result<T, ExtractionError> {
        match self.outcome {
            Outcome::Data(d) => Ok(d),
            Outcome::Error(e) => Err(e),
        }
    }
}

/// Processing and billing information for one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub processing_time_ms: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    pub credits: u64,
    /// Whether the costlier fallback tier ran.
    pub fallback_triggered: bool,
}

/// Score that was outside `[0, 1]`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("confidence score {score} for '{field}' is outside [0, 1]")]
pub struct ScoreOutOfRange {
    pub field: String,
    pub score: f64,
}

fn check_score(field: &str, score: f64) -> Result<f64, ScoreOutOfRange> {
    if (0.0..=1.0).contains(&score) {
        Ok(score)
    } else {
        Err(ScoreOutOfRange {
            field: field.to_string(),
            score,
        })
    }
}

/// Confidence for one extracted field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConfidence {
    field: String,
    score: f64,
    reason: String,
    page: Option<u32>,
    text: Option<String>,
}

impl FieldConfidence {
    pub fn new(
        field: impl Into<String>,
        score: f64,
        reason: impl Into<String>,
        page: Option<u32>,
        text: Option<String>,
    ) -> Result<Self, ScoreOutOfRange> {
        let field = field.into();
        let score = check_score(&field, score)?;
        Ok(Self {
            field,
            score,
            reason: reason.into(),
            page,
            text,
        })
    }

    /// JSON path of the field, e.g. `$.total`.
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn page(&self) -> Option<u32> {
        self.page
    }

    /// Source text the value was read from.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

/// Document- and field-level confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionMeta {
    confidence_score: f64,
    field_confidence: Vec<FieldConfidence>,
    issues: Vec<String>,
}

impl ExtractionMeta {
    pub fn new(
        confidence_score: f64,
        field_confidence: Vec<FieldConfidence>,
        issues: Vec<String>,
    ) -> Result<Self, ScoreOutOfRange> {
        Ok(Self {
            confidence_score: check_score("$", confidence_score)?,
            field_confidence,
            issues,
        })
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    /// In the order the service reported them.
    pub fn field_confidence(&self) -> &[FieldConfidence] {
        &self.field_confidence
    }

    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    /// Confidence entry for a JSON path, if reported.
    pub fn confidence_for(&self, json_path: &str) -> Option<&FieldConfidence> {
        self.field_confidence.iter().find(|fc| fc.field == json_path)
    }
}

/// Overall verdict of server-side math verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Passed,
    Failed,
    Partial,
    CannotVerify,
    NoRules,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Passed => "PASSED",
            VerificationStatus::Failed => "FAILED",
            VerificationStatus::Partial => "PARTIAL",
            VerificationStatus::CannotVerify => "CANNOT_VERIFY",
            VerificationStatus::NoRules => "NO_RULES",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One arithmetic consistency check run by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationCheck {
    /// Rule name, e.g. `HORIZONTAL_SUM`.
    #[serde(rename = "type")]
    pub check_type: String,
    pub status: String,
    #[serde(default)]
    pub fields: Vec<String>,
    pub passed: bool,
    #[serde(default)]
    pub expected: Option<f64>,
    #[serde(default)]
    pub actual: Option<f64>,
    #[serde(default)]
    pub delta: Option<f64>,
}

/// Counts that do not add up to the number of checks run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "verification counts {checks_passed} passed + {checks_failed} failed + \
     {cannot_verify_count} cannot-verify != {checks_run} checks run"
)]
pub struct CountMismatch {
    pub checks_passed: u32,
    pub checks_failed: u32,
    pub cannot_verify_count: u32,
    pub checks_run: usize,
}

/// Server-computed verification outcome. The client never re-does the math;
/// it only guarantees the counts match the list of checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    status: VerificationStatus,
    checks_passed: u32,
    checks_failed: u32,
    cannot_verify_count: u32,
    checks_run: Vec<VerificationCheck>,
}

impl Verification {
    pub fn new(
        status: VerificationStatus,
        checks_passed: u32,
        checks_failed: u32,
        cannot_verify_count: u32,
        checks_run: Vec<VerificationCheck>,
    ) -> Result<Self, CountMismatch> {
        let total = checks_passed as u64 + checks_failed as u64 + cannot_verify_count as u64;
        if total != checks_run.len() as u64 {
            return Err(CountMismatch {
                checks_passed,
                checks_failed,
                cannot_verify_count,
                checks_run: checks_run.len(),
            });
        }
        Ok(Self {
            status,
            checks_passed,
            checks_failed,
            cannot_verify_count,
            checks_run,
        })
    }

    pub fn status(&self) -> VerificationStatus {
        self.status
    }

    pub fn checks_passed(&self) -> u32 {
        self.checks_passed
    }

    pub fn checks_failed(&self) -> u32 {
        self.checks_failed
    }

    pub fn cannot_verify_count(&self) -> u32 {
        self.cannot_verify_count
    }

    pub fn checks_run(&self) -> &[VerificationCheck] {
        &self.checks_run
    }
}
