//! hifi-bridge - source-agnostic hi-fi control bridge core
//!
//! The adapter/bus/aggregator runtime behind the bridge:
//! - Typed in-process event bus
//! - Zone aggregator (single source of truth for zone listings)
//! - Adapter lifecycle (handle + coordinator with crash budgets and
//!   acknowledged shutdown)
//! - DSP protocol client (TCP/XML control on port 4321, UDP multicast
//!   discovery)
//!
//! HTTP/SSE handlers, web UIs and hardware integrations consume this crate
//! through [`service::Bridge`] and the event bus; they are not part of it.

// Deny truly dangerous patterns (these will fail the build)
#![deny(unsafe_code)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod adapters;
pub mod aggregator;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod service;
