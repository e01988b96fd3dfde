//! File-transfer registry — in-flight transfer state, keyed by message id.
//!
//! The broker relays chunk payloads as they arrive and keeps only a byte
//! counter per transfer, never the file contents. An entry lives from the
//! PUBLISH_FILE announcement until the declared size is reached.

use dashmap::DashMap;

/// State of one in-flight transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    pub filename: String,
    /// Declared total size from the announcement.
    pub size: u32,
    /// Bytes relayed so far.
    pub received: u32,
    pub sender: String,
    /// Destination topic (DM or group), fixed at announcement time.
    pub recipient: String,
    pub complete: bool,
}

/// Byte-counter snapshot returned by [`TransferRegistry::append`].
#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
    pub received: u32,
    pub size: u32,
    pub complete: bool,
}

#[derive(Default)]
pub struct TransferRegistry {
    active: DashMap<u32, FileTransfer>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new transfer. Message ids are allocated client-side and can
    /// collide; a collision replaces the stale entry and is logged.
    pub fn open(&self, message_id: u32, filename: &str, size: u32, sender: &str, recipient: &str) {
        let transfer = FileTransfer {
            filename: filename.to_owned(),
            size,
            received: 0,
            sender: sender.to_owned(),
            recipient: recipient.to_owned(),
            complete: false,
        };
        if let Some(stale) = self.active.insert(message_id, transfer) {
            tracing::warn!(
                message_id,
                stale_file = %stale.filename,
                new_file = %filename,
                "message id reused; replacing in-flight transfer"
            );
        }
    }

    /// Count a relayed chunk. Marks the transfer complete when the counter
    /// reaches the declared size. Returns None for an unknown id.
    pub fn append(&self, message_id: u32, chunk_len: u32) -> Option<TransferProgress> {
        let mut entry = self.active.get_mut(&message_id)?;
        entry.received = entry.received.saturating_add(chunk_len);
        if entry.received >= entry.size {
            entry.complete = true;
        }
        Some(TransferProgress {
            received: entry.received,
            size: entry.size,
            complete: entry.complete,
        })
    }

    /// The (sender, recipient topic) pair fixed at announcement time.
    /// Chunk fan-out routes on this, not on the chunk's own topic field.
    pub fn route(&self, message_id: u32) -> Option<(String, String)> {
        self.active
            .get(&message_id)
            .map(|t| (t.sender.clone(), t.recipient.clone()))
    }

    pub fn sender(&self, message_id: u32) -> Option<String> {
        self.active.get(&message_id).map(|t| t.sender.clone())
    }

    pub fn recipient(&self, message_id: u32) -> Option<String> {
        self.active.get(&message_id).map(|t| t.recipient.clone())
    }

    /// Fraction received, 0.0–1.0.
    pub fn progress(&self, message_id: u32) -> Option<f32> {
        self.active.get(&message_id).map(|t| {
            if t.size == 0 {
                0.0
            } else {
                t.received as f32 / t.size as f32
            }
        })
    }

    pub fn is_complete(&self, message_id: u32) -> bool {
        self.active
            .get(&message_id)
            .map(|t| t.complete)
            .unwrap_or(false)
    }

    pub fn remove(&self, message_id: u32) -> bool {
        self.active.remove(&message_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_accumulates_until_declared_size() {
        let transfers = TransferRegistry::new();
        transfers.open(42, "notes.txt", 10, "alice", "dm_alice_bob");

        let p = transfers.append(42, 6).unwrap();
        assert_eq!(p.received, 6);
        assert!(!p.complete);

        let p = transfers.append(42, 4).unwrap();
        assert_eq!(p.received, 10);
        assert!(p.complete);
        assert!(transfers.is_complete(42));
    }

    #[test]
    fn unknown_id_yields_none() {
        let transfers = TransferRegistry::new();
        assert!(transfers.append(7, 100).is_none());
        assert!(transfers.route(7).is_none());
        assert!(!transfers.is_complete(7));
    }

    #[test]
    fn open_replaces_a_reused_id() {
        let transfers = TransferRegistry::new();
        transfers.open(1, "old.bin", 100, "alice", "dm_alice_bob");
        transfers.append(1, 50);

        transfers.open(1, "new.bin", 4, "carol", "team");
        let (sender, recipient) = transfers.route(1).unwrap();
        assert_eq!(sender, "carol");
        assert_eq!(recipient, "team");
        // Counter restarted with the replacement.
        assert_eq!(transfers.append(1, 4).unwrap().received, 4);
    }

    #[test]
    fn route_reflects_the_announcement() {
        let transfers = TransferRegistry::new();
        transfers.open(9, "a.txt", 1, "alice", "team");
        assert_eq!(transfers.sender(9).as_deref(), Some("alice"));
        assert_eq!(transfers.recipient(9).as_deref(), Some("team"));
    }

    #[test]
    fn progress_is_a_ratio() {
        let transfers = TransferRegistry::new();
        transfers.open(3, "half.bin", 8, "alice", "team");
        transfers.append(3, 4);
        assert_eq!(transfers.progress(3), Some(0.5));
    }

    #[test]
    fn remove_drops_the_entry() {
        let transfers = TransferRegistry::new();
        transfers.open(5, "x", 1, "a", "t");
        assert!(transfers.remove(5));
        assert!(!transfers.remove(5));
        assert!(transfers.is_empty());
    }
}
