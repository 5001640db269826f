//! Error types for Causeway
//!
//! Every user-facing variant names the variable, method or test that caused it
//! and carries a one-line remediation hint.

use thiserror::Error;

/// Causeway error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad variable declaration (treatment / outcome / confounders).
    #[error("invalid model ({variable}): {message} (hint: {hint})")]
    InvalidModel {
        /// Offending variable.
        variable: String,
        /// What is wrong.
        message: String,
        /// Remediation hint.
        hint: String,
    },

    /// No valid adjustment strategy for the requested methods.
    #[error("identification failed: {message} (hint: {hint})")]
    Identification {
        /// What is wrong.
        message: String,
        /// Remediation hint.
        hint: String,
    },

    /// Per-method numerical or statistical failure.
    #[error("estimation failed for {method}: {message} (hint: {hint})")]
    Estimation {
        /// Estimator identifier.
        method: String,
        /// What went wrong.
        message: String,
        /// Remediation hint.
        hint: String,
    },

    /// Refutation test inapplicable or failed to complete.
    #[error("refutation '{test}' failed: {message} (hint: {hint})")]
    Refutation {
        /// Refutation test identifier.
        test: String,
        /// What went wrong.
        message: String,
        /// Remediation hint.
        hint: String,
    },

    /// Dataset failed boundary validation.
    #[error("invalid dataset (column '{column}'): {message} (hint: {hint})")]
    InvalidDataset {
        /// Offending column.
        column: String,
        /// What is wrong.
        message: String,
        /// Remediation hint.
        hint: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// A long-running job was cancelled by the caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Internal invariant violated (a bug, not a user error).
    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    /// Build an [`Error::InvalidModel`].
    pub fn invalid_model(
        variable: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self::InvalidModel { variable: variable.into(), message: message.into(), hint: hint.into() }
    }

    /// Build an [`Error::Identification`].
    pub fn identification(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Identification { message: message.into(), hint: hint.into() }
    }

    /// Build an [`Error::Estimation`].
    pub fn estimation(
        method: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self::Estimation { method: method.into(), message: message.into(), hint: hint.into() }
    }

    /// Build an [`Error::Refutation`].
    pub fn refutation(
        test: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self::Refutation { test: test.into(), message: message.into(), hint: hint.into() }
    }

    /// Build an [`Error::InvalidDataset`].
    pub fn invalid_dataset(
        column: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self::InvalidDataset { column: column.into(), message: message.into(), hint: hint.into() }
    }

    /// Stable short identifier of the error category (used in reports).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::InvalidModel { .. } => "invalid_model",
            Self::Identification { .. } => "identification",
            Self::Estimation { .. } => "estimation",
            Self::Refutation { .. } => "refutation",
            Self::InvalidDataset { .. } => "invalid_dataset",
            Self::Validation(_) => "validation",
            Self::Computation(_) => "computation",
            Self::Cancelled(_) => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Remediation hint, when the variant carries one.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::InvalidModel { hint, .. }
            | Self::Identification { hint, .. }
            | Self::Estimation { hint, .. }
            | Self::Refutation { hint, .. }
            | Self::InvalidDataset { hint, .. } => Some(hint),
            _ => None,
        }
    }

    /// Re-tag a low-level failure as an estimation failure of `method`.
    ///
    /// Variants that already carry their own context pass through unchanged.
    pub fn into_estimation(self, method: &str) -> Self {
        match self {
            Self::Validation(msg) => {
                Self::estimation(method, msg, "check the declared columns and sample size")
            }
            Self::Computation(msg) => Self::estimation(
                method,
                msg,
                "check for zero-variance or perfectly collinear confounders",
            ),
            other => other,
        }
    }

    /// Re-tag any non-cancellation failure as a refutation failure of `test`.
    pub fn into_refutation(self, test: &str) -> Self {
        match self {
            Self::Cancelled(_) | Self::Refutation { .. } | Self::Internal(_) => self,
            other => {
                let hint = other
                    .hint()
                    .map(str::to_string)
                    .unwrap_or_else(|| "re-run the estimator before refuting".to_string());
                Self::refutation(test, other.to_string(), hint)
            }
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_context_and_hint() {
        let e = Error::estimation("ipw", "propensity fit diverged", "increase sample size");
        let s = e.to_string();
        assert!(s.contains("ipw"));
        assert!(s.contains("increase sample size"));
        assert_eq!(e.kind(), "estimation");
        assert_eq!(e.hint(), Some("increase sample size"));
    }

    #[test]
    fn test_into_estimation_wraps_low_level_errors() {
        let e = Error::Computation("singular XtX".into()).into_estimation("linear_regression");
        match e {
            Error::Estimation { method, message, .. } => {
                assert_eq!(method, "linear_regression");
                assert!(message.contains("singular"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_into_refutation_keeps_cancellation() {
        let e = Error::Cancelled("stopped".into()).into_refutation("bootstrap");
        assert_eq!(e.kind(), "cancelled");
        let e = Error::Validation("bad".into()).into_refutation("bootstrap");
        assert_eq!(e.kind(), "refutation");
    }
}
