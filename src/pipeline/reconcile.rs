//! Response reconciliation: raw status + body → typed result.
//!
//! ## Decision order
//!
//! 1. Non-2xx status → [`ApiError`] (`HTTP_ERROR`); the body is kept for
//!    inspection but not interpreted further.
//! 2. Body that is not a JSON envelope, or lacks `metadata` →
//!    `MALFORMED_RESPONSE`.
//! 3. Envelope with an `error` object → `Ok(ExtractResult)` holding the
//!    business error. Not a fault.
//! 4. Envelope with `data` → checked field by field against the contract
//!    (`SCHEMA_MISMATCH` on any miss), then deserialised into `T`.
//! 5. Confidence and verification blocks are mapped as sent. The client
//!    trusts the server's verdict and only rejects structures that
//!    contradict themselves (`INTERNAL_INCONSISTENCY`).
//!
//! Errors raised after the envelope parsed carry its metadata, so the
//! credits a rejected response consumed are still visible to the caller.

use crate::contract::{Contract, ContractType, FieldContract};
use crate::error::ApiError;
use crate::output::{
    ExtractResult, ExtractionError, ExtractionMeta, ExtractionMetadata, FieldConfidence,
    Verification, VerificationCheck, VerificationStatus,
};
use crate::pipeline::transport::is_success_status;
use crate::schema::PrimitiveKind;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

// ── Wire format ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default, alias = "object")]
    data: Option<Value>,
    #[serde(default, alias = "_meta")]
    meta: Option<WireMeta>,
    #[serde(default)]
    verification: Option<WireVerification>,
    #[serde(default)]
    metadata: Option<ExtractionMetadata>,
    #[serde(default)]
    error: Option<ExtractionError>,
}

#[derive(Debug, Deserialize)]
struct WireMeta {
    confidence_score: f64,
    #[serde(default)]
    field_confidence: Vec<WireFieldConfidence>,
    #[serde(default)]
    issues: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireFieldConfidence {
    field: String,
    score: f64,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireVerification {
    status: VerificationStatus,
    checks_passed: u32,
    checks_failed: u32,
    #[serde(default)]
    cannot_verify_count: u32,
    #[serde(default)]
    checks_run: Vec<VerificationCheck>,
}

// ── Entry point ──────────────────────────────────────────────────────────────

/// Reconcile one response against the contract it was requested with.
pub fn reconcile<T: DeserializeOwned>(
    status: u16,
    body: &[u8],
    contract: &Contract,
    verification_requested: bool,
) -> Result<ExtractResult<T>, ApiError> {
    if !is_success_status(status) {
        return Err(http_error(status, body));
    }

    let raw: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::malformed(status, format!("response body is not valid JSON: {e}")))?;
    if !raw.is_object() {
        return Err(ApiError::malformed(status, "response body is not a JSON object"));
    }
    let envelope: Envelope = serde_json::from_value(raw)
        .map_err(|e| ApiError::malformed(status, format!("invalid response envelope: {e}")))?;

    let metadata = envelope
        .metadata
        .ok_or_else(|| ApiError::malformed(status, "response envelope has no metadata block"))?;

    if let Some(error) = envelope.error {
        info!(
            code = %error.code,
            fallback_triggered = metadata.fallback_triggered,
            "extraction returned a business error"
        );
        return Ok(ExtractResult::failure(error, metadata));
    }

    let data = envelope.data.ok_or_else(|| {
        ApiError::malformed(status, "response envelope has neither data nor error")
            .with_metadata(metadata)
    })?;

    let mismatches = check_against_contract(&data, contract);
    if !mismatches.is_empty() {
        return Err(ApiError::schema_mismatch(
            status,
            format!(
                "response data does not match contract '{}': {}",
                contract.root(),
                mismatches.join("; ")
            ),
        )
        .with_metadata(metadata));
    }

    let typed: T = serde_json::from_value(data).map_err(|e| {
        let message = format!("response data does not fit the target type: {e}");
        ApiError::schema_mismatch(status, message).with_metadata(metadata)
    })?;

    let meta = envelope
        .meta
        .map(map_meta)
        .transpose()
        .map_err(|e| ApiError::inconsistency(status, e).with_metadata(metadata))?;

    let verification = match envelope.verification {
        Some(v) if verification_requested => Some(
            map_verification(v)
                .map_err(|e| ApiError::inconsistency(status, e).with_metadata(metadata))?,
        ),
        Some(_) => {
            debug!("dropping verification block that was not requested");
            None
        }
        None => None,
    };

    Ok(ExtractResult::success(typed, meta, verification, metadata))
}

fn http_error(status: u16, body: &[u8]) -> ApiError {
    let response: Option<Value> = serde_json::from_slice(body).ok();
    let detail = response.as_ref().and_then(server_message).or_else(|| {
        let text = String::from_utf8_lossy(body);
        let text = text.trim();
        (!text.is_empty()).then(|| text.chars().take(200).collect())
    });

    let message = match detail {
        Some(d) => format!("API request failed with status {status}: {d}"),
        None => format!("API request failed with status {status}"),
    };
    ApiError::http(status, message, response)
}

/// Best-effort human message from an error body.
fn server_message(body: &Value) -> Option<String> {
    match body.get("error") {
        Some(Value::String(s)) => return Some(s.clone()),
        Some(Value::Object(o)) => {
            if let Some(Value::String(m)) = o.get("message") {
                return Some(m.clone());
            }
        }
        _ => {}
    }
    ["message", "detail"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str).map(str::to_string))
}

fn map_meta(wire: WireMeta) -> Result<ExtractionMeta, String> {
    let field_confidence = wire
        .field_confidence
        .into_iter()
        .map(|fc| FieldConfidence::new(fc.field, fc.score, fc.reason, fc.page, fc.text))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    ExtractionMeta::new(wire.confidence_score, field_confidence, wire.issues)
        .map_err(|e| e.to_string())
}

fn map_verification(wire: WireVerification) -> Result<Verification, String> {
    Verification::new(
        wire.status,
        wire.checks_passed,
        wire.checks_failed,
        wire.cannot_verify_count,
        wire.checks_run,
    )
    .map_err(|e| e.to_string())
}

// ── Contract check ───────────────────────────────────────────────────────────

/// Every way `data` violates the contract, as `path: problem` strings.
pub fn check_against_contract(data: &Value, contract: &Contract) -> Vec<String> {
    let mut errors = Vec::new();
    check_object(data, contract.fields(), contract, "$", &mut errors);
    errors
}

fn check_object(
    value: &Value,
    fields: &[FieldContract],
    contract: &Contract,
    path: &str,
    errors: &mut Vec<String>,
) {
    let Some(obj) = value.as_object() else {
        errors.push(format!("{path}: expected object, got {}", json_kind(value)));
        return;
    };
    for field in fields {
        let field_path = format!("{path}.{}", field.name);
        match obj.get(&field.name) {
            Some(v) => check_type(v, &field.ty, contract, &field_path, errors),
            None if field.required => errors.push(format!("{field_path}: required field missing")),
            None => {}
        }
    }
}

fn check_type(
    value: &Value,
    ty: &ContractType,
    contract: &Contract,
    path: &str,
    errors: &mut Vec<String>,
) {
    match ty {
        ContractType::Optional { inner } => {
            if !value.is_null() {
                check_type(value, inner, contract, path, errors);
            }
        }
        ContractType::Primitive { primitive } => {
            let ok = match primitive {
                PrimitiveKind::String => value.is_string(),
                PrimitiveKind::Integer => value.is_i64() || value.is_u64(),
                PrimitiveKind::Number => value.is_number(),
                PrimitiveKind::Boolean => value.is_boolean(),
            };
            if !ok {
                errors.push(format!(
                    "{path}: expected {}, got {}",
                    primitive.json_type(),
                    json_kind(value)
                ));
            }
        }
        ContractType::List { items } => match value.as_array() {
            Some(elements) => {
                for (i, element) in elements.iter().enumerate() {
                    check_type(element, items, contract, &format!("{path}[{i}]"), errors);
                }
            }
            None => errors.push(format!("{path}: expected array, got {}", json_kind(value))),
        },
        ContractType::Nested { fields, .. } => check_object(value, fields, contract, path, errors),
        ContractType::Ref { schema } => match contract.definition(schema) {
            Some(fields) => check_object(value, fields, contract, path, errors),
            None => errors.push(format!("{path}: contract has no definition for '{schema}'")),
        },
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorCode;
    use crate::schema::{Field, Schema, TypeDescriptor};
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        value: i64,
        notes: Option<String>,
    }

    fn contract() -> Contract {
        Contract::compile(
            &Schema::new("Sample")
                .field(Field::new("name", TypeDescriptor::string()).description("A name field"))
                .field(
                    Field::new("value", TypeDescriptor::integer()).description("A numeric value"),
                )
                .field(
                    Field::new("notes", TypeDescriptor::optional(TypeDescriptor::string()))
                        .default_null()
                        .description("Optional notes"),
                ),
        )
        .unwrap()
    }

    fn metadata() -> Value {
        json!({"processing_time_ms": 1500, "credits": 1, "fallback_triggered": false})
    }

    fn body(v: Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    #[test]
    fn successful_response() {
        let b = body(json!({
            "object": {"name": "Test", "value": 42},
            "_meta": {
                "confidence_score": 0.95,
                "field_confidence": [
                    {"field": "$.name", "score": 0.98, "reason": "Exact match",
                     "page": 1, "text": "Test"},
                    {"field": "$.value", "score": 0.92, "reason": "Numeric extraction",
                     "page": 1, "text": "42"}
                ],
                "issues": []
            },
            "metadata": metadata(),
            "error": null
        }));

        let result: ExtractResult<Sample> = reconcile(200, &b, &contract(), false).unwrap();
        assert_eq!(
            result.data(),
            Some(&Sample {
                name: "Test".into(),
                value: 42,
                notes: None
            })
        );
        let meta = result.meta().unwrap();
        assert_eq!(meta.confidence_score(), 0.95);
        assert_eq!(meta.field_confidence().len(), 2);
        assert_eq!(meta.field_confidence()[0].field(), "$.name");
        assert_eq!(meta.field_confidence()[0].score(), 0.98);
        assert_eq!(meta.confidence_for("$.value").unwrap().text(), Some("42"));
        assert_eq!(result.metadata().processing_time_ms, 1500);
        assert_eq!(result.metadata().input_tokens, 0);
        assert!(result.error().is_none());
    }

    #[test]
    fn canonical_key_names_accepted() {
        let b = body(json!({
            "data": {"name": "Test", "value": 1, "notes": "rush"},
            "meta": {"confidence_score": 0.9},
            "metadata": {"processing_time_ms": 5, "input_tokens": 100, "output_tokens": 20,
                         "credits": 2, "fallback_triggered": true}
        }));
        let result: ExtractResult<Sample> = reconcile(200, &b, &contract(), false).unwrap();
        assert_eq!(result.data().unwrap().notes.as_deref(), Some("rush"));
        assert_eq!(result.metadata().output_tokens, 20);
        assert!(result.metadata().fallback_triggered);
        assert!(result.meta().unwrap().field_confidence().is_empty());
    }

    #[test]
    fn response_without_meta() {
        let b = body(json!({
            "object": {"name": "Test", "value": 42},
            "metadata": metadata(),
            "error": null
        }));
        let result: ExtractResult = reconcile(200, &b, &contract(), false).unwrap();
        assert!(result.data().is_some());
        assert!(result.meta().is_none());
    }

    #[test]
    fn business_error_is_data() {
        let b = body(json!({
            "object": null,
            "_meta": {"confidence_score": 0.3, "field_confidence": [],
                      "issues": ["Could not identify invoice number"]},
            "metadata": {"processing_time_ms": 500, "credits": 1, "fallback_triggered": true},
            "error": {
                "code": "EXTRACTION_FAILED",
                "message": "Could not extract data from document"
            }
        }));
        let result: ExtractResult = reconcile(200, &b, &contract(), true).unwrap();
        assert!(result.data().is_none());
        let err = result.error().unwrap();
        assert_eq!(err.code, "EXTRACTION_FAILED");
        assert!(err.message.contains("Could not extract"));
        assert!(result.metadata().fallback_triggered);
        assert!(result.meta().is_none());
        assert!(result.verification().is_none());
    }

    #[test]
    fn http_error_keeps_status_and_body() {
        let err = reconcile::<Value>(401, br#"{"error": "Unauthorized"}"#, &contract(), false)
            .unwrap_err();
        assert_eq!(err.code, ApiErrorCode::Http);
        assert_eq!(err.status_code, Some(401));
        assert!(err.message.contains("401"));
        assert!(err.message.contains("Unauthorized"));
        assert_eq!(err.response, Some(json!({"error": "Unauthorized"})));
    }

    #[test]
    fn http_error_with_non_json_body() {
        let err = reconcile::<Value>(502, b"Bad Gateway", &contract(), false).unwrap_err();
        assert_eq!(err.status_code, Some(502));
        assert!(err.response.is_none());
        assert!(err.message.ends_with("Bad Gateway"));
    }

    #[test]
    fn malformed_bodies() {
        let bodies: [&[u8]; 3] = [
            b"not json",
            b"[1,2]",
            br#"{"object": {"name": "x", "value": 1}}"#,
        ];
        for b in bodies {
            let err = reconcile::<Value>(200, b, &contract(), false).unwrap_err();
            assert_eq!(err.code, ApiErrorCode::MalformedResponse);
        }
    }

    #[test]
    fn neither_data_nor_error_is_malformed() {
        let b = body(json!({"object": null, "metadata": metadata(), "error": null}));
        let err = reconcile::<Value>(200, &b, &contract(), false).unwrap_err();
        assert_eq!(err.code, ApiErrorCode::MalformedResponse);
        assert_eq!(err.metadata.unwrap().credits, 1);
    }

    #[test]
    fn missing_required_field_is_schema_mismatch() {
        let b = body(json!({"object": {"name": "Test"}, "metadata": metadata()}));
        let err = reconcile::<Value>(200, &b, &contract(), false).unwrap_err();
        assert_eq!(err.code, ApiErrorCode::SchemaMismatch);
        assert!(err.message.contains("$.value: required field missing"));
        assert!(err.metadata.is_some());
    }

    #[test]
    fn type_mismatch_is_schema_mismatch() {
        let b = body(json!({"object": {"name": 7, "value": "42"}, "metadata": metadata()}));
        let err = reconcile::<Value>(200, &b, &contract(), false).unwrap_err();
        assert_eq!(err.code, ApiErrorCode::SchemaMismatch);
        assert!(err.message.contains("$.name: expected string, got integer"));
        assert!(err.message.contains("$.value: expected integer, got string"));
    }

    #[test]
    fn null_for_required_non_nullable_is_rejected() {
        let b = body(json!({"object": {"name": null, "value": 1}, "metadata": metadata()}));
        let err = reconcile::<Value>(200, &b, &contract(), false).unwrap_err();
        assert!(err.message.contains("$.name: expected string, got null"));
    }

    #[test]
    fn nested_list_paths_in_mismatch() {
        let contract = Contract::compile(
            &Schema::new("Invoice")
                .field(Field::new("items", TypeDescriptor::list(TypeDescriptor::nested("Item"))))
                .define(Schema::new("Item").field(Field::new("amount", TypeDescriptor::number()))),
        )
        .unwrap();
        let data = json!({"items": [{"amount": 1.5}, {"amount": "x"}, {}]});
        let errors = check_against_contract(&data, &contract);
        assert_eq!(
            errors,
            vec![
                "$.items[1].amount: expected number, got string".to_string(),
                "$.items[2].amount: required field missing".to_string(),
            ]
        );
    }

    #[test]
    fn recursive_contract_checks_through_refs() {
        let contract = Contract::compile(
            &Schema::new("Node")
                .field(Field::new("label", TypeDescriptor::string()))
                .field(Field::new(
                    "children",
                    TypeDescriptor::list(TypeDescriptor::nested("Node")),
                )),
        )
        .unwrap();
        let ok = json!({"label": "a", "children": [{"label": "b", "children": []}]});
        assert!(check_against_contract(&ok, &contract).is_empty());
        let bad = json!({
            "label": "a",
            "children": [{"label": "b", "children": [{"children": []}]}]
        });
        assert_eq!(
            check_against_contract(&bad, &contract),
            vec!["$.children[0].children[0].label: required field missing".to_string()]
        );
    }

    #[test]
    fn verification_mapped_when_requested() {
        let b = body(json!({
            "object": {"name": "Test", "value": 42},
            "metadata": metadata(),
            "verification": {
                "status": "PASSED", "checks_passed": 1, "checks_failed": 0,
                "cannot_verify_count": 0,
                "checks_run": [{"type": "HORIZONTAL_SUM", "status": "PASSED",
                                "fields": ["total", "subtotal", "tax"], "passed": true,
                                "delta": 0.0, "expected": 1250.00, "actual": 1250.00}]
            }
        }));
        let result: ExtractResult = reconcile(200, &b, &contract(), true).unwrap();
        let v = result.verification().unwrap();
        assert_eq!(v.status(), VerificationStatus::Passed);
        assert_eq!(v.checks_passed(), 1);
        assert_eq!(v.checks_run()[0].check_type, "HORIZONTAL_SUM");
        assert!(v.checks_run()[0].passed);
        assert_eq!(v.checks_run()[0].delta, Some(0.0));

        let unrequested: ExtractResult = reconcile(200, &b, &contract(), false).unwrap();
        assert!(unrequested.verification().is_none());
    }

    #[test]
    fn verification_count_mismatch_is_inconsistency() {
        let b = body(json!({
            "object": {"name": "Test", "value": 42},
            "metadata": metadata(),
            "verification": {"status": "PASSED", "checks_passed": 2, "checks_failed": 0,
                             "cannot_verify_count": 0, "checks_run": []}
        }));
        let err = reconcile::<Value>(200, &b, &contract(), true).unwrap_err();
        assert_eq!(err.code, ApiErrorCode::InternalInconsistency);
        assert!(err.metadata.is_some());
    }

    #[test]
    fn out_of_range_score_is_inconsistency() {
        let b = body(json!({
            "object": {"name": "Test", "value": 42},
            "_meta": {"confidence_score": 0.9,
                      "field_confidence": [{"field": "$.name", "score": 1.7, "reason": "?"}]},
            "metadata": metadata()
        }));
        let err = reconcile::<Value>(200, &b, &contract(), false).unwrap_err();
        assert_eq!(err.code, ApiErrorCode::InternalInconsistency);
        assert!(err.message.contains("$.name"));
    }
}
