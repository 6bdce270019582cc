//! Error types for the DSON asset engine.
//!
//! Two tiers, per the propagation policy: `DsonError` for failures a caller
//! must handle, and `Issue`/`IssueList` for recoverable problems collected
//! while producing a best-effort result (a single bad reference never aborts
//! a whole character import).

use serde::{Deserialize, Serialize};

/// Failure kinds for load, resolve, and evaluate operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DsonError {
    /// Malformed reference syntax or a malformed document record.
    #[error("parse error: {reason}")]
    Parse { reason: String },

    /// A reference targets a missing asset, node, or channel.
    #[error("unresolved reference {reference}: {reason}")]
    Resolve { reference: String, reason: String },

    /// Library lookup miss. Recoverable by re-scanning the library.
    #[error("not found in library: {id}")]
    NotFound { id: String },

    /// The modifier requires-graph contains a cycle. `cycle` lists the
    /// modifiers along the cycle, in order, first repeated at the end.
    #[error("cyclic modifier dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// The formula operation graph contains a cycle. Only the named
    /// channels (one connected component) are affected.
    #[error("formula cycle involving {}", channels.join(", "))]
    FormulaCycle { channels: Vec<String> },

    /// A known-but-unimplemented record shape. Always recoverable.
    #[error("unsupported construct {construct} in {context}")]
    UnsupportedConstruct { construct: String, context: String },

    /// Filesystem error while indexing or loading.
    #[error("io error on {path}: {reason}")]
    Io { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Broad category of a collected issue, for filtering in the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Parse,
    Resolve,
    NotFound,
    CyclicDependency,
    FormulaCycle,
    UnsupportedConstruct,
    Io,
    Conflict,
}

/// One recoverable problem encountered while producing a best-effort result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub kind: IssueKind,
    /// What was being processed when the issue arose (asset id, modifier id).
    pub context: String,
    pub message: String,
}

impl Issue {
    pub fn warning(kind: IssueKind, context: impl Into<String>, message: impl Into<String>) -> Self {
        Issue {
            severity: Severity::Warning,
            kind,
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn error(kind: IssueKind, context: impl Into<String>, message: impl Into<String>) -> Self {
        Issue {
            severity: Severity::Error,
            kind,
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn from_error(err: &DsonError, context: impl Into<String>) -> Self {
        let kind = match err {
            DsonError::Parse { .. } => IssueKind::Parse,
            DsonError::Resolve { .. } => IssueKind::Resolve,
            DsonError::NotFound { .. } => IssueKind::NotFound,
            DsonError::CyclicDependency { .. } => IssueKind::CyclicDependency,
            DsonError::FormulaCycle { .. } => IssueKind::FormulaCycle,
            DsonError::UnsupportedConstruct { .. } => IssueKind::UnsupportedConstruct,
            DsonError::Io { .. } => IssueKind::Io,
        };
        Issue::warning(kind, context, err.to_string())
    }
}

/// Ordered collection of issues surfaced alongside a best-effort result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueList(pub Vec<Issue>);

impl IssueList {
    pub fn new() -> Self {
        IssueList(Vec::new())
    }

    pub fn push(&mut self, issue: Issue) {
        self.0.push(issue);
    }

    pub fn extend(&mut self, other: IssueList) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.0.iter()
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|i| i.severity == Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_names_participants() {
        let err = DsonError::CyclicDependency {
            cycle: vec!["M1".into(), "M2".into(), "M1".into()],
        };
        assert_eq!(
            err.to_string(),
            "cyclic modifier dependency: M1 -> M2 -> M1"
        );
    }

    #[test]
    fn issue_from_error_maps_kind() {
        let err = DsonError::NotFound { id: "x".into() };
        let issue = Issue::from_error(&err, "load");
        assert_eq!(issue.kind, IssueKind::NotFound);
        assert_eq!(issue.severity, Severity::Warning);
    }
}
