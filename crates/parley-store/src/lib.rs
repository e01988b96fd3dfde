//! parley-store — file-backed persistence for messages, users, and groups.
//!
//! Three line-delimited CSV tables under one data directory. Messages are
//! append-only; the user and group tables are rewritten in full on mutation,
//! through a temp file and an atomic rename so a crash never leaves a torn
//! table behind. Suited to the broker's scale (tens of users, hundreds of
//! groups); nothing here is a general-purpose database.

use std::path::Path;

mod error;
mod groups;
mod messages;
mod table;
mod users;

pub use error::StoreError;
pub use groups::{GroupRecord, GroupTable};
pub use messages::{MessageLog, NewMessage, StoredMessage};
pub use users::{UserRecord, UserTable};

/// The three tables, opened together under one directory.
pub struct Store {
    pub messages: MessageLog,
    pub users: UserTable,
    pub groups: GroupTable,
}

impl Store {
    /// Open (creating if absent) the data directory and all tables.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            messages: MessageLog::open(dir.join("messages.csv"))?,
            users: UserTable::open(dir.join("users.csv"))?,
            groups: GroupTable::open(dir.join("groups.csv"))?,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_dir {
    use std::path::PathBuf;

    /// Fresh per-test scratch directory.
    pub fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "parley-store-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
