//! Append-only record of match attempts.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::{Candidate, Expectation};

/// One match attempt: the candidate that arrived and, when a match was found,
/// a frozen snapshot of the chosen expectation taken after its `use` call.
#[derive(Debug, Clone)]
pub struct Assertion {
    id: Uuid,
    candidate: Candidate,
    expectation: Option<Expectation>,
    created_at: DateTime<Utc>,
}

impl Assertion {
    pub(crate) fn matched(candidate: Candidate, expectation: Expectation) -> Self {
        Self {
            id: Uuid::new_v4(),
            candidate,
            expectation: Some(expectation),
            created_at: Utc::now(),
        }
    }

    pub(crate) fn unmatched(candidate: Candidate) -> Self {
        Self {
            id: Uuid::new_v4(),
            candidate,
            expectation: None,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    /// The frozen expectation snapshot; `None` for unmatched attempts.
    pub fn expectation(&self) -> Option<&Expectation> {
        self.expectation.as_ref()
    }

    pub fn is_matched(&self) -> bool {
        self.expectation.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Chronological assertion log, cleared only by the reset-all operation.
#[derive(Debug, Default)]
pub(crate) struct AssertionLog {
    entries: Vec<Assertion>,
}

impl AssertionLog {
    pub(crate) fn push(&mut self, assertion: Assertion) {
        self.entries.push(assertion);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn all(&self) -> &[Assertion] {
        &self.entries
    }

    pub(crate) fn matched(&self) -> Vec<Assertion> {
        self.entries
            .iter()
            .filter(|a| a.is_matched())
            .cloned()
            .collect()
    }

    pub(crate) fn unmatched(&self) -> Vec<Assertion> {
        self.entries
            .iter()
            .filter(|a| !a.is_matched())
            .cloned()
            .collect()
    }

    pub(crate) fn for_expectation(&self, id: Uuid) -> Vec<Assertion> {
        self.entries
            .iter()
            .filter(|a| a.expectation().is_some_and(|e| e.id() == id))
            .cloned()
            .collect()
    }
}
