//! Typed events delivered by the client's reader task.
//!
//! One variant per inbound message kind, delivered over an mpsc channel to a
//! single consumer. This replaces per-kind callback slots: match on the
//! variant you care about and ignore the rest.

use std::path::PathBuf;

/// Everything the broker can push at a connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A text message published to a topic this client receives.
    Message {
        sender: String,
        topic: String,
        text: String,
    },
    /// An incoming file finished downloading.
    FileReceived {
        sender: String,
        filename: String,
        size: u32,
        path: PathBuf,
    },
    /// A user came online or went offline.
    UserStatus { username: String, online: bool },
    /// Full list of online users (this client excluded).
    UserList(Vec<String>),
    /// One history row, replayed on request.
    History {
        sender: String,
        topic: String,
        text: String,
        timestamp: u64,
    },
    /// A new group appeared somewhere on the broker.
    GroupCreated { name: String, creator: String },
    /// The group catalogue, with this client's membership flags.
    GroupList(Vec<GroupEntry>),
    /// An opaque game frame relayed from a peer.
    Game { from: String, payload: String },
    /// Per-request status from the broker.
    Ack(String),
    /// Per-request error from the broker.
    Error(String),
    /// The connection is gone; no further events will arrive.
    Disconnected,
}

/// One row of the group catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub is_member: bool,
}
