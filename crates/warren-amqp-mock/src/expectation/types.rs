//! Core expectation value types.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::comparator::BodyComparator;

/// Validation errors for expectation construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpectationError {
    #[error("exchange cannot be empty")]
    EmptyExchange,
    #[error("routing key cannot be empty")]
    EmptyRoutingKey,
    #[error("expectation call times must be greater than or equal to 1")]
    BadTimes,
    #[error("expectation ttl must be greater than 0")]
    NonPositiveTtl,
}

/// The request pattern of an expectation: which exchange and routing key the
/// message must arrive on, and what its body must look like.
#[derive(Debug, Clone)]
pub struct Request {
    exchange: String,
    routing_key: String,
    body: BodyComparator,
}

impl Request {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: BodyComparator,
    ) -> Result<Self, ExpectationError> {
        let exchange = exchange.into();
        let routing_key = routing_key.into();

        if exchange.is_empty() {
            return Err(ExpectationError::EmptyExchange);
        }
        if routing_key.is_empty() {
            return Err(ExpectationError::EmptyRoutingKey);
        }

        Ok(Self {
            exchange,
            routing_key,
            body,
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn body_comparator(&self) -> &BodyComparator {
        &self.body
    }

    pub fn matches(&self, candidate: &Candidate) -> bool {
        self.exchange == candidate.exchange()
            && self.routing_key == candidate.routing_key()
            && self.body.matches(candidate.body())
    }
}

/// The canned reply published when an expectation matches.
#[derive(Debug, Clone)]
pub struct Response {
    body: Bytes,
}

impl Response {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// One inbound broker delivery reduced to the fields matching cares about.
#[derive(Debug, Clone)]
pub struct Candidate {
    exchange: String,
    routing_key: String,
    body: Bytes,
}

impl Candidate {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Result<Self, ExpectationError> {
        let exchange = exchange.into();
        let routing_key = routing_key.into();

        if exchange.is_empty() {
            return Err(ExpectationError::EmptyExchange);
        }
        if routing_key.is_empty() {
            return Err(ExpectationError::EmptyRoutingKey);
        }

        Ok(Self {
            exchange,
            routing_key,
            body: body.into(),
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Usage counter for an expectation. A limited counter admits at most
/// `remaining` further matches; an unlimited one has no bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Times {
    unlimited: bool,
    remaining: u32,
}

impl Times {
    /// Limited usage. Fails when `count` is zero.
    pub fn limited(count: u32) -> Result<Self, ExpectationError> {
        if count < 1 {
            return Err(ExpectationError::BadTimes);
        }
        Ok(Self {
            unlimited: false,
            remaining: count,
        })
    }

    pub fn unlimited() -> Self {
        Self {
            unlimited: true,
            remaining: 0,
        }
    }

    /// Default for freshly built expectations: one use.
    pub(crate) fn once() -> Self {
        Self {
            unlimited: false,
            remaining: 1,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.unlimited
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub(crate) fn use_once(&mut self) {
        if !self.unlimited {
            self.remaining = self.remaining.saturating_sub(1);
        }
    }

    pub(crate) fn exhausted(&self) -> bool {
        !self.unlimited && self.remaining == 0
    }
}

/// Strictly positive lifetime of an expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeToLive(Duration);

impl TimeToLive {
    pub fn new(duration: Duration) -> Result<Self, ExpectationError> {
        if duration.is_zero() {
            return Err(ExpectationError::NonPositiveTtl);
        }
        Ok(Self(duration))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }
}

/// A rule that, when its request pattern accepts a candidate, produces a
/// canned reply. Only the registry mutates an expectation, and only through
/// `use_once`.
#[derive(Debug, Clone)]
pub struct Expectation {
    id: Uuid,
    request: Arc<Request>,
    response: Arc<Response>,
    times: Times,
    ttl: Option<TimeToLive>,
    priority: i32,
    created_at: DateTime<Utc>,
}

impl Expectation {
    pub fn builder(request: Request, response: Response) -> ExpectationBuilder {
        ExpectationBuilder {
            request,
            response,
            times: Times::once(),
            ttl: None,
            priority: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn times(&self) -> Times {
        self.times
    }

    pub fn ttl(&self) -> Option<TimeToLive> {
        self.ttl
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the expectation stops being matchable, if it carries a TTL.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = self.ttl?;
        TimeDelta::from_std(ttl.duration())
            .ok()
            .and_then(|delta| self.created_at.checked_add_signed(delta))
    }

    pub fn matches(&self, candidate: &Candidate) -> bool {
        self.is_active() && self.request.matches(candidate)
    }

    /// Active means: usage not exhausted and TTL (if any) not elapsed.
    pub fn is_active(&self) -> bool {
        if self.times.exhausted() {
            return false;
        }
        if let Some(expires_at) = self.expires_at() {
            if Utc::now() > expires_at {
                return false;
            }
        }
        true
    }

    pub(crate) fn use_once(&mut self) {
        self.times.use_once();
    }

    /// Frozen snapshot: request and response are shared (immutable), counters
    /// and metadata are value-copied.
    pub fn snapshot(&self) -> Expectation {
        self.clone()
    }
}

/// Builds an expectation. Later modifiers win, so a `times` call after
/// another `times` call replaces it.
#[derive(Debug)]
pub struct ExpectationBuilder {
    request: Request,
    response: Response,
    times: Times,
    ttl: Option<TimeToLive>,
    priority: i32,
}

impl ExpectationBuilder {
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn times(mut self, times: Times) -> Self {
        self.times = times;
        self
    }

    pub fn ttl(mut self, ttl: TimeToLive) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn build(self) -> Expectation {
        Expectation {
            id: Uuid::new_v4(),
            request: Arc::new(self.request),
            response: Arc::new(self.response),
            times: self.times,
            ttl: self.ttl,
            priority: self.priority,
            created_at: Utc::now(),
        }
    }
}
