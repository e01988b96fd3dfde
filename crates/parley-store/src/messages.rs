//! The append-only message table.
//!
//! One row per chat message, text or file. Ids are allocated here and
//! strictly increase for the lifetime of the store; on open the counter
//! resumes at one past the highest id on disk.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::error::StoreError;
use crate::table;

const HEADER: &str = "id,sender,recipient,content,timestamp,isGroup,isFile,filename";

/// A message about to be persisted.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub sender: &'a str,
    /// Peer username for DMs, group name for group messages.
    pub recipient: &'a str,
    /// Message text, or the `[FILE] <name>` marker for file messages.
    pub content: &'a str,
    pub is_group: bool,
    pub is_file: bool,
    /// Empty for text messages.
    pub filename: &'a str,
}

/// A message row read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: u32,
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub timestamp: u64,
    pub is_group: bool,
    pub is_file: bool,
    pub filename: String,
}

pub struct MessageLog {
    path: PathBuf,
    next_id: Mutex<u32>,
}

impl MessageLog {
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        table::init_table(&path, HEADER)?;

        // Resume the id counter past the highest id on disk.
        let mut next_id = 1u32;
        for row in table::read_rows(&path)? {
            if let Some(msg) = parse_row(&row) {
                next_id = next_id.max(msg.id + 1);
            }
        }

        Ok(Self {
            path,
            next_id: Mutex::new(next_id),
        })
    }

    /// Append a message, allocating its id. Returns the id.
    pub fn append(&self, msg: NewMessage<'_>) -> Result<u32, StoreError> {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            let id = *next;
            *next += 1;
            id
        };

        let row = format!(
            "{id},{},{},{},{},{},{},{}",
            table::escape(msg.sender),
            table::escape(msg.recipient),
            table::escape(msg.content),
            table::unix_now(),
            if msg.is_group { "1" } else { "0" },
            if msg.is_file { "1" } else { "0" },
            table::escape(msg.filename),
        );
        table::append_row(&self.path, &row)?;
        Ok(id)
    }

    /// Last `limit` messages addressed to a topic (group name), oldest first.
    pub fn topic_history(&self, topic: &str, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        self.filtered_history(limit, |m| m.recipient == topic)
    }

    /// Last `limit` direct messages between two users, either direction,
    /// oldest first.
    pub fn dm_history(&self, a: &str, b: &str, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        self.filtered_history(limit, |m| {
            !m.is_group
                && ((m.sender == a && m.recipient == b) || (m.sender == b && m.recipient == a))
        })
    }

    fn filtered_history(
        &self,
        limit: usize,
        keep: impl Fn(&StoredMessage) -> bool,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let mut matches = Vec::new();
        for row in table::read_rows(&self.path)? {
            match parse_row(&row) {
                Some(msg) if keep(&msg) => matches.push(msg),
                Some(_) => {}
                None => tracing::warn!(row = %row, "skipping corrupt message row"),
            }
        }
        if matches.len() > limit {
            matches.drain(..matches.len() - limit);
        }
        Ok(matches)
    }
}

fn parse_row(row: &str) -> Option<StoredMessage> {
    let parts: Vec<&str> = row.splitn(8, ',').collect();
    if parts.len() < 8 {
        return None;
    }
    Some(StoredMessage {
        id: parts[0].parse().ok()?,
        sender: parts[1].to_owned(),
        recipient: parts[2].to_owned(),
        content: parts[3].to_owned(),
        timestamp: parts[4].parse().ok()?,
        is_group: parts[5] == "1",
        is_file: parts[6] == "1",
        filename: parts[7].to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_dir;

    fn text(sender: &'static str, recipient: &'static str, content: &'static str, is_group: bool) -> NewMessage<'static> {
        NewMessage {
            sender,
            recipient,
            content,
            is_group,
            is_file: false,
            filename: "",
        }
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let dir = test_dir::scratch("msg-ids");
        let log = MessageLog::open(dir.join("messages.csv")).unwrap();

        let a = log.append(text("alice", "bob", "one", false)).unwrap();
        let b = log.append(text("alice", "bob", "two", false)).unwrap();
        assert!(b > a);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn id_counter_survives_reopen() {
        let dir = test_dir::scratch("msg-reopen");
        let path = dir.join("messages.csv");

        let first = {
            let log = MessageLog::open(path.clone()).unwrap();
            log.append(text("alice", "bob", "hello", false)).unwrap()
        };

        let log = MessageLog::open(path).unwrap();
        let second = log.append(text("bob", "alice", "hey", false)).unwrap();
        assert_eq!(second, first + 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn dm_history_matches_both_directions() {
        let dir = test_dir::scratch("msg-dm");
        let log = MessageLog::open(dir.join("messages.csv")).unwrap();

        log.append(text("alice", "bob", "hi", false)).unwrap();
        log.append(text("bob", "alice", "hey", false)).unwrap();
        log.append(text("alice", "carol", "other", false)).unwrap();
        log.append(text("alice", "team", "group", true)).unwrap();

        let history = log.dm_history("alice", "bob", 50).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[1].content, "hey");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn topic_history_respects_limit() {
        let dir = test_dir::scratch("msg-limit");
        let log = MessageLog::open(dir.join("messages.csv")).unwrap();

        for i in 0..5 {
            let body = format!("msg {i}");
            log.append(NewMessage {
                sender: "alice",
                recipient: "team",
                content: &body,
                is_group: true,
                is_file: false,
                filename: "",
            })
            .unwrap();
        }

        let history = log.topic_history("team", 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "msg 2");
        assert_eq!(history[2].content, "msg 4");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn commas_and_newlines_are_sanitized() {
        let dir = test_dir::scratch("msg-escape");
        let log = MessageLog::open(dir.join("messages.csv")).unwrap();

        log.append(text("alice", "bob", "a,b\nc", false)).unwrap();

        let history = log.dm_history("alice", "bob", 50).unwrap();
        assert_eq!(history[0].content, "a;b c");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_rows_round_trip() {
        let dir = test_dir::scratch("msg-file");
        let log = MessageLog::open(dir.join("messages.csv")).unwrap();

        log.append(NewMessage {
            sender: "alice",
            recipient: "bob",
            content: "[FILE] notes.txt",
            is_group: false,
            is_file: true,
            filename: "notes.txt",
        })
        .unwrap();

        let history = log.dm_history("alice", "bob", 50).unwrap();
        assert!(history[0].is_file);
        assert_eq!(history[0].filename, "notes.txt");
        assert_eq!(history[0].content, "[FILE] notes.txt");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
