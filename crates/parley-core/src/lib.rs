//! parley-core — wire format, framing, topic naming, and shared configuration.
//! The broker daemon and the client library both depend on this crate.

pub mod config;
pub mod frame;
pub mod topic;
pub mod wire;

pub use frame::{FileMeta, Frame, FrameError};
pub use wire::MsgType;
