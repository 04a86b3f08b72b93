//! Odyssey Core - Delegated spending authorization for agent sessions.
//!
//! This crate implements:
//! - Spending-limit ledger with base-unit arithmetic
//! - Session lifecycle (pending, active, expired, revoked)
//! - Pairing and session-request negotiation state machines
//! - Bounded approval polling with cancellation
//! - Authorization facade over the approval backend, ledger and secure store

#![forbid(unsafe_code)]

// Core state machines
pub mod negotiation;
pub mod session;

// Services
pub mod authz;
pub mod limits;
pub mod poller;

// Boundaries
pub mod api;
pub mod clock;
pub mod ledger;
pub mod store;

// Supporting modules
pub mod errors;
pub mod keys;
pub mod transactions;
pub mod types;
pub mod harness;

// Optional backend implementations
#[cfg(feature = "http-backend")]
pub mod http_backend;

#[cfg(feature = "rpc-ledger")]
pub mod rpc_ledger;

mod proptests;

pub use authz::{AuthzConfig, Authorizer, Collaborators, Unpaired};
pub use errors::{AuthzError, AuthzResult};
