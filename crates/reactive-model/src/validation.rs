//! The validation pipeline (component C): run a field's ordered validator
//! list against a candidate value, fail-fast or aggregate, with a per-async-
//! validator timeout.
//!
//! Shaped after `validation_pipeline.rs` in the teacher crate — that module
//! orders validators by expected cost and records a decision ledger; this
//! one keeps its doc-comment density and struct-per-concern layout but
//! implements the spec's simpler contract: declared order, fail-fast or
//! aggregate, timeout-bounded async predicates.

use std::time::Duration;

use crate::error::{ErrorClassifier, ErrorRecord};
use crate::schema::{DataSnapshot, FieldSchema, Predicate, Validator, Value};

/// Pipeline-wide configuration (spec §6: `asyncValidationTimeout`, `failFast`).
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub timeout: Duration,
    pub fail_fast: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            fail_fast: false,
        }
    }
}

/// Run `schema`'s validators against `candidate`. Returns the conjunction
/// of all validator verdicts and appends one [`ErrorRecord`] per failure to
/// `errors_out` (order is unspecified in aggregate mode, per spec §4.C).
pub async fn validate_field(
    schema: &FieldSchema,
    candidate: &Value,
    field: &str,
    data: &DataSnapshot,
    config: &PipelineConfig,
    classifier: &ErrorClassifier,
    errors_out: &mut Vec<ErrorRecord>,
) -> bool {
    if schema.validators.is_empty() {
        return true;
    }

    if config.fail_fast {
        for validator in &schema.validators {
            if gated_out(validator, data) {
                continue;
            }
            let outcome = run_one(validator, candidate, field, config.timeout).await;
            if let Some(err) = outcome.error {
                classifier.trigger_error(ErrorRecord::validation(field, err.message.clone()));
                errors_out.push(err);
                return false;
            }
        }
        true
    } else {
        let mut futures = Vec::with_capacity(schema.validators.len());
        for validator in &schema.validators {
            if gated_out(validator, data) {
                continue;
            }
            futures.push(run_one(validator, candidate, field, config.timeout));
        }
        let outcomes = futures::future::join_all(futures).await;
        let mut all_valid = true;
        for outcome in outcomes {
            if let Some(err) = outcome.error {
                classifier.trigger_error(ErrorRecord::validation(field, err.message.clone()));
                errors_out.push(err);
                all_valid = false;
            }
        }
        all_valid
    }
}

fn gated_out(validator: &Validator, data: &DataSnapshot) -> bool {
    match &validator.condition {
        Some(condition) => !condition(data),
        None => false,
    }
}

struct Outcome {
    error: Option<ErrorRecord>,
}

async fn run_one(validator: &Validator, candidate: &Value, field: &str, timeout: Duration) -> Outcome {
    match &validator.predicate {
        Predicate::Sync(predicate) => {
            if predicate(candidate) {
                Outcome { error: None }
            } else {
                Outcome {
                    error: Some(ErrorRecord::validation(field, validator.message.clone()).with_rule(&validator.tag)),
                }
            }
        }
        Predicate::Async(predicate) => {
            let fut = predicate(candidate.clone());
            match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(true)) => Outcome { error: None },
                Ok(Ok(false)) => Outcome {
                    error: Some(ErrorRecord::validation(field, validator.message.clone()).with_rule(&validator.tag)),
                },
                Ok(Err(rejection)) => Outcome {
                    error: Some(
                        ErrorRecord::validation(field, format!("Validation failed: {rejection}"))
                            .with_rule("validation_error"),
                    ),
                },
                Err(_elapsed) => Outcome {
                    error: Some(
                        ErrorRecord::validation(field, format!("Validation failed: Validation timeout: {field}"))
                            .with_rule("validation_error"),
                    ),
                },
            }
        }
    }
}
