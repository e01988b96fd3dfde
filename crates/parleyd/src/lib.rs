//! parleyd — the Parley broker as a library.
//!
//! The binary in `main.rs` is a thin wrapper; everything testable lives here.
//! One [`Broker`] owns the listener, the registries, and the dispatcher.

pub mod broker;
pub mod clients;
pub mod handler;
pub mod topics;
pub mod transfers;

pub use broker::Broker;
