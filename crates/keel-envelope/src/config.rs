use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Any error fails validation with [`KernelError::EnvelopeValidation`](keel_types::KernelError).
    Strict,
    /// Problems are reported in the result; validation itself never fails.
    #[default]
    Lenient,
}

impl std::fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationMode::Strict => f.write_str("strict"),
            ValidationMode::Lenient => f.write_str("lenient"),
        }
    }
}

/// Envelope validation settings. `Default` is the lenient profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeValidationConfig {
    pub mode: ValidationMode,
    pub require_correlation_id: bool,
    pub reject_empty_list_payloads: bool,
    pub validate_payload_schema: bool,
    pub require_all_optional_fields: bool,
    pub log_warnings: bool,
}

impl Default for EnvelopeValidationConfig {
    fn default() -> Self {
        Self::lenient()
    }
}

impl EnvelopeValidationConfig {
    pub fn lenient() -> Self {
        Self {
            mode: ValidationMode::Lenient,
            require_correlation_id: false,
            reject_empty_list_payloads: true,
            validate_payload_schema: true,
            require_all_optional_fields: false,
            log_warnings: true,
        }
    }

    pub fn strict() -> Self {
        Self {
            mode: ValidationMode::Strict,
            require_correlation_id: true,
            ..Self::lenient()
        }
    }

    pub fn is_strict(&self) -> bool {
        self.mode == ValidationMode::Strict
    }

    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_require_correlation_id(mut self, on: bool) -> Self {
        self.require_correlation_id = on;
        self
    }

    pub fn with_reject_empty_list_payloads(mut self, on: bool) -> Self {
        self.reject_empty_list_payloads = on;
        self
    }

    pub fn with_validate_payload_schema(mut self, on: bool) -> Self {
        self.validate_payload_schema = on;
        self
    }

    pub fn with_require_all_optional_fields(mut self, on: bool) -> Self {
        self.require_all_optional_fields = on;
        self
    }

    pub fn with_log_warnings(mut self, on: bool) -> Self {
        self.log_warnings = on;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_lenient_without_required_correlation() {
        let cfg = EnvelopeValidationConfig::default();
        assert_eq!(cfg.mode, ValidationMode::Lenient);
        assert!(!cfg.require_correlation_id);
        assert!(cfg.reject_empty_list_payloads);
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let cfg: EnvelopeValidationConfig =
            serde_json::from_str(r#"{"mode": "strict", "log_warnings": false}"#).unwrap();
        assert!(cfg.is_strict());
        assert!(!cfg.log_warnings);
        assert!(cfg.validate_payload_schema);
    }
}
