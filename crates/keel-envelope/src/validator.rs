//! Envelope validation at the dispatch boundary.
//!
//! Checks run in two groups. Structural checks look at routing metadata
//! (`correlation_id`, `source_node`, `operation`, and in strict mode the
//! optional fields). Payload checks look at the payload against the operation:
//! list-expecting operations must not carry empty lists, and operations with a
//! registered [`PayloadSchema`] must carry its required keys.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use keel_types::{KernelError, Result};

use crate::config::{EnvelopeValidationConfig, ValidationMode};
use crate::envelope::{CorrelationId, Envelope};

/// Operations whose payload carries a batch under one of [`LIST_KEYS`].
pub const LIST_OPERATIONS: &[&str] = &[
    "BULK_INSERT",
    "BULK_UPDATE",
    "BULK_DELETE",
    "BATCH_PROCESS",
    "PROCESS_BATCH",
];

/// Payload keys inspected for empty lists.
pub const LIST_KEYS: &[&str] = &["items", "data", "records"];

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeValidationResult {
    /// `true` iff `errors` is empty.
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub mode: ValidationMode,
}

#[derive(Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn push(&mut self, severity: Severity, message: String) {
        match severity {
            Severity::Error => self.errors.push(message),
            Severity::Warning => self.warnings.push(message),
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Required payload keys for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadSchema {
    pub required: Vec<String>,
    /// Keys expected to hold UUIDs. Mismatches only warn.
    pub uuid_fields: Vec<String>,
}

impl PayloadSchema {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            uuid_fields: Vec::new(),
        }
    }

    pub fn with_uuid_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uuid_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

fn builtin_schemas() -> BTreeMap<String, PayloadSchema> {
    let mut schemas = BTreeMap::new();
    schemas.insert("CREATE".into(), PayloadSchema::new(["data"]));
    schemas.insert(
        "UPDATE".into(),
        PayloadSchema::new(["id", "data"]).with_uuid_fields(["id"]),
    );
    schemas.insert(
        "DELETE".into(),
        PayloadSchema::new(["id"]).with_uuid_fields(["id"]),
    );
    schemas.insert("QUERY".into(), PayloadSchema::new(["query"]));
    for op in ["BULK_INSERT", "BULK_UPDATE", "BULK_DELETE"] {
        schemas.insert(op.into(), PayloadSchema::new(["items"]));
    }
    schemas
}

/// An envelope cleared for dispatch.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub envelope: Envelope,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// EnvelopeValidator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EnvelopeValidator {
    config: EnvelopeValidationConfig,
    schemas: BTreeMap<String, PayloadSchema>,
}

impl Default for EnvelopeValidator {
    fn default() -> Self {
        Self::new(EnvelopeValidationConfig::default())
    }
}

impl EnvelopeValidator {
    /// Validator with the built-in payload schemas.
    pub fn new(config: EnvelopeValidationConfig) -> Self {
        Self {
            config,
            schemas: builtin_schemas(),
        }
    }

    pub fn config(&self) -> &EnvelopeValidationConfig {
        &self.config
    }

    /// Register or replace the schema for `operation` (matched case-insensitively).
    pub fn with_schema(mut self, operation: &str, schema: PayloadSchema) -> Self {
        self.schemas.insert(operation.to_uppercase(), schema);
        self
    }

    /// Validate `envelope` under the validator's config, or `config_override`
    /// when given.
    ///
    /// Strict mode returns [`KernelError::EnvelopeValidation`] carrying every
    /// error when any check fails. Lenient mode always returns `Ok`.
    pub fn validate(
        &self,
        envelope: &Envelope,
        config_override: Option<&EnvelopeValidationConfig>,
    ) -> Result<EnvelopeValidationResult> {
        let config = config_override.unwrap_or(&self.config);
        let mut findings = Findings::default();

        self.check_structure(envelope, config, &mut findings);
        self.check_payload(envelope, config, &mut findings);

        if config.log_warnings {
            for warning in &findings.warnings {
                tracing::warn!(
                    envelope_id = %envelope.envelope_id,
                    operation = %envelope.operation,
                    "{warning}"
                );
            }
        }

        if config.is_strict() && !findings.errors.is_empty() {
            return Err(KernelError::EnvelopeValidation {
                envelope_id: envelope.envelope_id.to_string(),
                violations: findings.errors,
            });
        }

        Ok(EnvelopeValidationResult {
            is_valid: findings.errors.is_empty(),
            errors: findings.errors,
            warnings: findings.warnings,
            mode: config.mode,
        })
    }

    /// Gate an envelope before it reaches a handler.
    ///
    /// Invalid envelopes are rejected in either mode. In lenient mode a
    /// missing correlation id is generated, and string ids that parse are
    /// coerced to UUIDs.
    pub fn admit(&self, mut envelope: Envelope) -> Result<Admitted> {
        let result = self.validate(&envelope, None)?;
        if !result.is_valid {
            return Err(KernelError::EnvelopeValidation {
                envelope_id: envelope.envelope_id.to_string(),
                violations: result.errors,
            });
        }

        if self.config.mode == ValidationMode::Lenient {
            let coerced = match envelope.correlation_id.as_ref() {
                None => {
                    let generated = Uuid::new_v4();
                    tracing::debug!(envelope_id = %envelope.envelope_id, correlation_id = %generated, "Generated correlation id");
                    Some(generated)
                }
                Some(id) => id.as_uuid(),
            };
            if let Some(id) = coerced {
                envelope.correlation_id = Some(CorrelationId::Uuid(id));
            }
        }

        Ok(Admitted {
            envelope,
            warnings: result.warnings,
        })
    }

    fn check_structure(&self, envelope: &Envelope, config: &EnvelopeValidationConfig, findings: &mut Findings) {
        match &envelope.correlation_id {
            None if config.require_correlation_id => findings.error("correlation_id is required"),
            None => findings.warn("correlation_id is missing; one will be generated"),
            Some(CorrelationId::Text(text)) => match Uuid::parse_str(text.trim()) {
                Ok(_) => findings.warn(format!("correlation_id '{text}' is a string; coerced to UUID")),
                Err(_) => findings.error(format!("correlation_id '{text}' is not a valid UUID")),
            },
            Some(CorrelationId::Uuid(_)) => {}
        }

        if envelope.source_node.trim().is_empty() {
            findings.error("source_node is required and must not be blank");
        }
        if envelope.operation.trim().is_empty() {
            findings.error("operation is required and must not be blank");
        }

        if config.is_strict() && config.require_all_optional_fields {
            if envelope.target_node.as_deref().map_or(true, |t| t.trim().is_empty()) {
                findings.error("target_node is required");
            }
            if envelope.envelope_version.as_deref().map_or(true, |v| v.trim().is_empty()) {
                findings.error("envelope_version is required");
            }
        }
    }

    fn check_payload(&self, envelope: &Envelope, config: &EnvelopeValidationConfig, findings: &mut Findings) {
        let operation = envelope.operation.trim().to_uppercase();
        let strict = config.is_strict();

        if LIST_OPERATIONS.contains(&operation.as_str()) {
            let severity = if strict && config.reject_empty_list_payloads {
                Severity::Error
            } else {
                Severity::Warning
            };
            for key in LIST_KEYS {
                if matches!(envelope.payload.get(*key), Some(serde_json::Value::Array(items)) if items.is_empty()) {
                    findings.push(severity, format!("{operation} payload '{key}' is an empty list"));
                }
            }
        }

        if !config.validate_payload_schema {
            return;
        }
        let Some(schema) = self.schemas.get(&operation) else {
            return;
        };

        let severity = if strict { Severity::Error } else { Severity::Warning };
        for key in &schema.required {
            if !envelope.payload.contains_key(key) {
                findings.push(severity, format!("{operation} payload is missing required field '{key}'"));
            }
        }
        for key in &schema.uuid_fields {
            match envelope.payload.get(key) {
                None => {}
                Some(serde_json::Value::String(s)) if Uuid::parse_str(s).is_ok() => {
                    findings.warn(format!("payload field '{key}' is a string; coerced to UUID"));
                }
                Some(other) => {
                    findings.warn(format!("payload field '{key}' should be a UUID, got {other}"));
                }
            }
        }
    }
}
