use serde::{Deserialize, Serialize};

use crate::error::EditError;

// ─── Diagnostics ──────────────────────────────────────────────────────────────

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One message produced while running an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn info(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<&EditError> for Diagnostic {
    fn from(error: &EditError) -> Self {
        Self {
            severity: Severity::Error,
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

// ─── Outcomes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Finished,
    Cancelled,
    NothingChanged,
}

/// What part of a target an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Selection,
    Geometry,
    Pose,
    Naming,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub target: String,
    pub kind: ChangeKind,
}

/// Result of one successful operation on one armature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpOutput {
    pub changed: Vec<ChangeKind>,
    pub diagnostics: Vec<Diagnostic>,
}

impl OpOutput {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn changed(kinds: &[ChangeKind]) -> Self {
        Self {
            changed: kinds.to_vec(),
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }

    pub fn is_unchanged(&self) -> bool {
        self.changed.is_empty()
    }
}

// ─── Reports ──────────────────────────────────────────────────────────────────

/// Result of a command on one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: String,
    pub outcome: Outcome,
    pub diagnostics: Vec<Diagnostic>,
}

impl TargetReport {
    pub fn from_result(target: &str, result: &Result<OpOutput, EditError>) -> Self {
        match result {
            Ok(output) => Self {
                target: target.to_string(),
                outcome: if output.is_unchanged() {
                    Outcome::NothingChanged
                } else {
                    Outcome::Finished
                },
                diagnostics: output.diagnostics.clone(),
            },
            Err(error) => Self {
                target: target.to_string(),
                outcome: Outcome::Cancelled,
                diagnostics: vec![Diagnostic::from(error)],
            },
        }
    }
}

/// Aggregated result of a command over every target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReport {
    pub outcome: Outcome,
    pub targets: Vec<TargetReport>,
    pub notifications: Vec<ChangeNotification>,
}

impl CommandReport {
    /// Finished when any target finished; cancelled when nothing changed
    /// and at least one target failed.
    pub fn from_targets(targets: Vec<TargetReport>, notifications: Vec<ChangeNotification>) -> Self {
        let outcome = if targets.iter().any(|t| t.outcome == Outcome::Finished) {
            Outcome::Finished
        } else if targets.iter().any(|t| t.outcome == Outcome::Cancelled) {
            Outcome::Cancelled
        } else {
            Outcome::NothingChanged
        };
        Self {
            outcome,
            targets,
            notifications,
        }
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.targets.iter().flat_map(|t| t.diagnostics.iter())
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics().any(|d| d.severity == Severity::Error)
    }
}
