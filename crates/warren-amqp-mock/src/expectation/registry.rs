//! Thread-safe expectation store and matching algorithm.

use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::assertion::{Assertion, AssertionLog};
use super::types::{Candidate, Expectation, Response};
use crate::consumer::Matcher;

/// Filter for listing expectations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectationFilter {
    pub status: Option<ExpectationStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectationStatus {
    Active,
    Expired,
}

/// Filter for listing assertions. `expectation_id` takes precedence over
/// `status` when both are set.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertionFilter {
    pub expectation_id: Option<Uuid>,
    pub status: Option<AssertionStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionStatus {
    Matched,
    Unmatched,
}

#[derive(Debug, Default)]
struct Inner {
    expectations: Vec<Expectation>,
    assertions: AssertionLog,
}

/// In-memory store of expectations and their assertion history.
///
/// All mutation happens under the write lock; a match is a single critical
/// section covering selection, the `use` decrement, and the assertion append,
/// so the "pick highest priority then decrement" step is atomic.
#[derive(Debug, Default)]
pub struct ExpectationRegistry {
    inner: RwLock<Inner>,
}

impl ExpectationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an expectation. Insertion order is preserved and is the
    /// tiebreaker after priority.
    pub fn create(&self, expectation: Expectation) -> Uuid {
        let id = expectation.id();
        info!(
            expectation_id = %id,
            exchange = expectation.request().exchange(),
            routing_key = expectation.request().routing_key(),
            priority = expectation.priority(),
            "expectation created"
        );

        self.spawn_expiry_notice(&expectation);
        self.inner.write().expectations.push(expectation);
        id
    }

    /// Matches a candidate against the stored expectations.
    ///
    /// The highest-priority active match wins; ties go to the earliest
    /// created. Exactly one assertion is appended per invocation.
    pub fn match_candidate(&self, candidate: &Candidate) -> Option<Response> {
        let mut inner = self.inner.write();

        let mut chosen: Option<usize> = None;
        for (idx, expectation) in inner.expectations.iter().enumerate() {
            if !expectation.matches(candidate) {
                continue;
            }
            let beats_current = match chosen {
                Some(best) => expectation.priority() > inner.expectations[best].priority(),
                None => true,
            };
            if beats_current {
                chosen = Some(idx);
            }
        }

        let Some(idx) = chosen else {
            warn!(
                exchange = candidate.exchange(),
                routing_key = candidate.routing_key(),
                "no match found"
            );
            inner.assertions.push(Assertion::unmatched(candidate.clone()));
            return None;
        };

        inner.expectations[idx].use_once();
        let frozen = inner.expectations[idx].snapshot();
        info!(
            expectation_id = %frozen.id(),
            exchange = candidate.exchange(),
            routing_key = candidate.routing_key(),
            "match found"
        );
        if !frozen.is_active() {
            info!(expectation_id = %frozen.id(), "expectation usage limit reached");
        }

        let response = frozen.response().clone();
        inner
            .assertions
            .push(Assertion::matched(candidate.clone(), frozen));
        Some(response)
    }

    /// Drops all expectations. The assertion log is retained.
    pub fn reset(&self) {
        self.inner.write().expectations.clear();
        info!("expectations reset");
    }

    /// Drops the assertion log. Used by the reset-all control operation.
    pub fn clear_assertions(&self) {
        self.inner.write().assertions.clear();
    }

    /// Snapshots of expectations in insertion order, optionally filtered by
    /// active/expired status.
    pub fn expectations(&self, filter: ExpectationFilter) -> Vec<Expectation> {
        let inner = self.inner.read();
        inner
            .expectations
            .iter()
            .filter(|e| match filter.status {
                None => true,
                Some(ExpectationStatus::Active) => e.is_active(),
                Some(ExpectationStatus::Expired) => !e.is_active(),
            })
            .map(Expectation::snapshot)
            .collect()
    }

    /// Snapshot of a single expectation by id.
    pub fn expectation(&self, id: Uuid) -> Option<Expectation> {
        let inner = self.inner.read();
        inner
            .expectations
            .iter()
            .find(|e| e.id() == id)
            .map(Expectation::snapshot)
    }

    /// Assertions in chronological order, filtered per `AssertionFilter`.
    pub fn assertions(&self, filter: AssertionFilter) -> Vec<Assertion> {
        let inner = self.inner.read();

        if let Some(id) = filter.expectation_id {
            return inner.assertions.for_expectation(id);
        }

        match filter.status {
            Some(AssertionStatus::Matched) => inner.assertions.matched(),
            Some(AssertionStatus::Unmatched) => inner.assertions.unmatched(),
            None => inner.assertions.all().to_vec(),
        }
    }

    /// Best-effort log line when an expectation's TTL elapses. Matching never
    /// depends on this timer; expiry is computed lazily by `is_active`.
    fn spawn_expiry_notice(&self, expectation: &Expectation) {
        let Some(ttl) = expectation.ttl() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let id = expectation.id();
        let duration = ttl.duration();
        handle.spawn(async move {
            tokio::time::sleep(duration).await;
            info!(
                expectation_id = %id,
                ttl_secs = duration.as_secs_f64(),
                "expectation expired"
            );
        });
    }
}

impl Matcher for ExpectationRegistry {
    fn match_candidate(&self, candidate: &Candidate) -> Option<Response> {
        ExpectationRegistry::match_candidate(self, candidate)
    }
}
