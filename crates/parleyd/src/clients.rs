//! Client registry — bidirectional map between usernames and connections.
//!
//! A connection exists from accept; it appears here only after a successful
//! LOGIN. The write half lives behind a per-connection mutex so one frame's
//! header and payload can never interleave with another write to the same
//! socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_core::{Frame, FrameError};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// The shared handle for one accepted connection.
pub struct ClientConn {
    id: u64,
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
}

impl ClientConn {
    pub fn new(peer: SocketAddr, writer: OwnedWriteHalf) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            writer: Mutex::new(writer),
        })
    }

    /// Process-unique id, used as the registry key for the reverse mapping.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write one frame, serialized against other writers of this socket.
    pub async fn send(&self, frame: &Frame) -> Result<(), FrameError> {
        let mut writer = self.writer.lock().await;
        frame.write_to(&mut *writer).await
    }
}

/// Username ↔ connection mapping.
#[derive(Default)]
pub struct ClientRegistry {
    by_name: DashMap<String, Arc<ClientConn>>,
    names: DashMap<u64, String>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a username to a connection. Fails if the name is taken.
    pub fn add(&self, username: &str, conn: Arc<ClientConn>) -> bool {
        match self.by_name.entry(username.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                self.names.insert(conn.id(), username.to_owned());
                slot.insert(conn);
                true
            }
        }
    }

    /// Drop the binding for a connection. Returns the username that was
    /// bound, if any.
    pub fn remove(&self, conn_id: u64) -> Option<String> {
        let (_, username) = self.names.remove(&conn_id)?;
        self.by_name.remove(&username);
        Some(username)
    }

    pub fn get(&self, username: &str) -> Option<Arc<ClientConn>> {
        self.by_name.get(username).map(|entry| entry.value().clone())
    }

    pub fn name_of(&self, conn_id: u64) -> Option<String> {
        self.names.get(&conn_id).map(|entry| entry.value().clone())
    }

    /// Stable copy of the username→connection mapping, for fan-out.
    pub fn snapshot(&self) -> Vec<(String, Arc<ClientConn>)> {
        self.by_name
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
