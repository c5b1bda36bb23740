//! HTTP/JSON control plane for the mock.
//!
//! Test harnesses use this surface to configure expectations, inspect
//! assertions and manage queue subscriptions. The transport translates
//! between the wire encoding and the typed core calls; it never reaches past
//! the registry and subscription service.

mod handlers;
mod router;
mod server;
pub mod types;

pub use router::route_request;
pub use server::AdminApiServer;

use std::sync::Arc;

use crate::expectation::ExpectationRegistry;
use crate::subscription::SubscriptionService;

/// Shared state handed to every handler.
pub struct AdminState {
    pub registry: Arc<ExpectationRegistry>,
    pub subscriptions: Arc<SubscriptionService>,
}
