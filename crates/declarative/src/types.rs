//! Core types for declarative resource management

use crate::resource::ResourceRef;
use std::fmt;

/// Action taken on a resource during an apply run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Failure happened before the required action could be determined
    Unknown,
    /// Resource did not exist and was created
    Create,
    /// Resource existed and was brought in line with its declaration
    Update,
}

impl Action {
    /// Lowercase name used in logs and result rendering
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of acting on one resource
///
/// Resources that needed no action produce no result.
#[derive(Debug)]
pub struct ApplyResult {
    action: Action,
    resource: ResourceRef,
    error: Option<anyhow::Error>,
}

impl ApplyResult {
    /// Record an action and its outcome
    pub fn new(action: Action, resource: ResourceRef, outcome: anyhow::Result<()>) -> Self {
        Self {
            action,
            resource,
            error: outcome.err(),
        }
    }

    /// Record a failure that happened before any action was chosen
    pub fn unknown(resource: ResourceRef, error: anyhow::Error) -> Self {
        Self {
            action: Action::Unknown,
            resource,
            error: Some(error),
        }
    }

    /// Action that was attempted
    pub fn action(&self) -> Action {
        self.action
    }

    /// Resource the action was taken on
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// Error, if the action failed
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    /// Whether the action succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "{{{}: {}, failed: {err:#}}}", self.action, self.resource),
            None => write!(f, "{{{}: {}}}", self.action, self.resource),
        }
    }
}

/// Ordered, append-only log of apply results
#[derive(Debug, Default)]
pub struct ApplyResults(Vec<ApplyResult>);

impl ApplyResults {
    /// Create an empty log
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a result
    pub fn push(&mut self, result: ApplyResult) {
        self.0.push(result);
    }

    /// Append every result of another log, keeping order
    pub fn append(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Number of results
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no resource was acted upon
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate results in declaration order
    pub fn iter(&self) -> std::slice::Iter<'_, ApplyResult> {
        self.0.iter()
    }

    /// Errors carried by the results, in order
    pub fn errors(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.0.iter().filter_map(ApplyResult::error)
    }

    /// Count results by action: (created, updated, failed)
    pub fn summary(&self) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for result in &self.0 {
            summary.add_result(result);
        }
        summary
    }
}

impl std::ops::Index<usize> for ApplyResults {
    type Output = ApplyResult;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<'a> IntoIterator for &'a ApplyResults {
    type Item = &'a ApplyResult;
    type IntoIter = std::slice::Iter<'a, ApplyResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for ApplyResults {
    type Item = ApplyResult;
    type IntoIter = std::vec::IntoIter<ApplyResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<ApplyResult> for ApplyResults {
    fn from_iter<I: IntoIterator<Item = ApplyResult>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Summary counts for an apply run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl ApplySummary {
    /// Total number of successful changes
    pub fn total_changes(&self) -> usize {
        self.created + self.updated
    }

    /// Check if the run was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        if !result.is_success() {
            self.failed += 1;
            return;
        }
        match result.action() {
            Action::Create => self.created += 1,
            Action::Update => self.updated += 1,
            Action::Unknown => {}
        }
    }
}
