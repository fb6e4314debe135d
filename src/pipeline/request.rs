//! Request assembly: file + contract + options → upload payload.
//!
//! Every check here is local. A request that leaves this module is known to
//! carry a supported, non-empty, size-limited document and a valid
//! threshold; anything else has already failed with a [`ValidationError`].

use crate::config::ExtractOptions;
use crate::contract::Contract;
use crate::error::{ParsefyError, ValidationError};
use crate::pipeline::input::{prepare_file, FileInput, PreparedFile};

/// Fully validated payload, ready for a [`crate::pipeline::transport::Transport`].
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub file: PreparedFile,
    /// Serialized field contract (JSON array).
    pub contract_json: String,
    /// JSON Schema rendering of the same contract.
    pub output_schema: String,
    pub confidence_threshold: f64,
    pub enable_verification: bool,
}

impl ExtractRequest {
    /// Text form fields, in the order they are sent after the file part.
    pub fn form_fields(&self) -> [(&'static str, String); 4] {
        [
            ("contract", self.contract_json.clone()),
            ("output_schema", self.output_schema.clone()),
            ("confidence_threshold", self.confidence_threshold.to_string()),
            ("enable_verification", self.enable_verification.to_string()),
        ]
    }
}

/// `(0, 1]`; NaN fails too.
pub fn validate_threshold(value: f64) -> Result<f64, ValidationError> {
    if value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(ValidationError::InvalidThreshold { value })
    }
}

/// Validate the input and bundle it with the contract and options.
///
/// Order: existence, file type, size (all in [`prepare_file`]), then the
/// threshold.
pub fn assemble(
    input: FileInput,
    contract: &Contract,
    options: &ExtractOptions,
) -> Result<ExtractRequest, ParsefyError> {
    let file = prepare_file(input)?;
    let confidence_threshold = validate_threshold(options.confidence_threshold)?;

    Ok(ExtractRequest {
        file,
        contract_json: contract.wire_json().to_string(),
        output_schema: contract.to_json_schema().to_string(),
        confidence_threshold,
        enable_verification: options.enable_verification,
    })
}
