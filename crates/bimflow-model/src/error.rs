//! Error types for the analytical model

use crate::validate::ValidationIssue;

/// Errors raised while parsing, validating, normalizing or editing a model
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Document is not valid JSON
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Document violates the model schema or referential integrity
    #[error("model validation failed: {}", render_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// Document is an error envelope written by a failed normalization
    #[error("document is an error envelope: {message}")]
    Enveloped {
        /// Message recorded in the envelope
        message: String,
    },

    /// Raw export carried no members
    #[error("raw export contains no members")]
    EmptyExport,

    /// Edit instruction both reverts and overrides
    #[error("edit instruction cannot revert to original and override {count} member(s)")]
    ConflictingEdit {
        /// Number of overrides supplied alongside the revert
        count: usize,
    },
}

impl ModelError {
    /// Wrap a single issue
    #[must_use]
    pub fn issue(issue: ValidationIssue) -> Self {
        Self::Validation(vec![issue])
    }

    /// Validation issues carried by this error, if any
    #[must_use]
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Self::Validation(issues) => issues,
            _ => &[],
        }
    }

    /// Short machine-readable kind, used in error envelopes
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "invalid_json",
            Self::Validation(_) => "validation",
            Self::Enveloped { .. } => "enveloped",
            Self::EmptyExport => "empty_export",
            Self::ConflictingEdit { .. } => "conflicting_edit",
        }
    }
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
