//! Envelope validation for the Keel execution kernel.
//!
//! An [`EnvelopeValidator`] checks message envelopes before they are handed to
//! a handler. Strict mode fails on the first pass that finds any error; lenient
//! mode reports errors and warnings without failing.

pub mod config;
pub mod envelope;
pub mod validator;

pub use config::{EnvelopeValidationConfig, ValidationMode};
pub use envelope::{CorrelationId, Envelope};
pub use validator::{
    Admitted, EnvelopeValidationResult, EnvelopeValidator, PayloadSchema, LIST_KEYS,
    LIST_OPERATIONS,
};
