//! Validation error taxonomy.
//!
//! Validation errors are recoverable: they are fed back to the reasoning
//! engine as corrections and recorded in the report.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// operation_id not in the catalog
    UnknownOperation,
    /// target not in the session's scope
    OutOfScope,
    /// Missing, empty or wrongly-typed field
    Malformed,
    /// Catalog entry is not read-only
    UnsafeOperation,
    /// Missing, unexpected or non-matching template parameter
    InvalidParameter,
    TooManyOperations,
}

impl std::fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownOperation => "unknown operation",
            Self::OutOfScope => "out of scope",
            Self::Malformed => "malformed",
            Self::UnsafeOperation => "unsafe operation",
            Self::InvalidParameter => "invalid parameter",
            Self::TooManyOperations => "too many operations",
        };
        write!(f, "{}", s)
    }
}

/// A single rejected item of an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} at {location}: {message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    /// Path into the intent, e.g. `operations[1].target`
    pub location: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn unknown_operation(index: usize, operation_id: &str) -> Self {
        Self::new(
            ValidationErrorKind::UnknownOperation,
            format!("operations[{}].operation_id", index),
            format!("unknown operation '{}'", operation_id),
        )
    }

    pub fn out_of_scope(index: usize, target: &str) -> Self {
        Self::new(
            ValidationErrorKind::OutOfScope,
            format!("operations[{}].target", index),
            format!("target '{}' is not in the session scope", target),
        )
    }

    pub fn malformed(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationErrorKind::Malformed, location, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ValidationError::unknown_operation(0, "reload_device");
        assert_eq!(
            err.to_string(),
            "unknown operation at operations[0].operation_id: unknown operation 'reload_device'"
        );
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let err = ValidationError::out_of_scope(2, "edge-9");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "out_of_scope");
        assert_eq!(json["location"], "operations[2].target");
    }
}
