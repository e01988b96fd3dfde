//! The user table.
//!
//! One row per username ever seen. The password hash column exists for a
//! future authentication scheme and is stored empty. Mutations rewrite the
//! table in full.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::error::StoreError;
use crate::table;

const HEADER: &str = "username,passwordHash,createdAt,lastSeen,isOnline";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub created_at: u64,
    pub last_seen: u64,
    pub is_online: bool,
}

pub struct UserTable {
    path: PathBuf,
    lock: Mutex<()>,
}

impl UserTable {
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        table::init_table(&path, HEADER)?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Create-or-mark-online, called on LOGIN. A known user gets `lastSeen`
    /// refreshed and `isOnline` set; an unknown one gets a fresh row.
    pub fn login(&self, username: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = table::unix_now();
        let mut users = self.read_all()?;

        match users.iter_mut().find(|u| u.username == username) {
            Some(user) => {
                user.last_seen = now;
                user.is_online = true;
            }
            None => users.push(UserRecord {
                username: username.to_owned(),
                password_hash: String::new(),
                created_at: now,
                last_seen: now,
                is_online: true,
            }),
        }

        self.write_all(&users)
    }

    /// Flip the online flag, refreshing `lastSeen`. Unknown users are a no-op.
    pub fn set_online(&self, username: &str, online: bool) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut users = self.read_all()?;

        if let Some(user) = users.iter_mut().find(|u| u.username == username) {
            user.is_online = online;
            user.last_seen = table::unix_now();
            self.write_all(&users)?;
        }
        Ok(())
    }

    /// Every user row, in file order.
    pub fn all(&self) -> Result<Vec<UserRecord>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_all()
    }

    fn read_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut users = Vec::new();
        for row in table::read_rows(&self.path)? {
            match parse_row(&row) {
                Some(user) => users.push(user),
                None => tracing::warn!(row = %row, "skipping corrupt user row"),
            }
        }
        Ok(users)
    }

    fn write_all(&self, users: &[UserRecord]) -> Result<(), StoreError> {
        let rows: Vec<String> = users
            .iter()
            .map(|u| {
                format!(
                    "{},{},{},{},{}",
                    table::escape(&u.username),
                    table::escape(&u.password_hash),
                    u.created_at,
                    u.last_seen,
                    if u.is_online { "1" } else { "0" },
                )
            })
            .collect();
        table::rewrite(&self.path, HEADER, &rows)?;
        Ok(())
    }
}

fn parse_row(row: &str) -> Option<UserRecord> {
    let parts: Vec<&str> = row.splitn(5, ',').collect();
    if parts.len() < 5 {
        return None;
    }
    Some(UserRecord {
        username: parts[0].to_owned(),
        password_hash: parts[1].to_owned(),
        created_at: parts[2].parse().ok()?,
        last_seen: parts[3].parse().ok()?,
        is_online: parts[4] == "1",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_dir;

    #[test]
    fn login_creates_then_updates() {
        let dir = test_dir::scratch("users-login");
        let users = UserTable::open(dir.join("users.csv")).unwrap();

        users.login("alice").unwrap();
        let all = users.all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_online);

        // Second login does not duplicate the row.
        users.login("alice").unwrap();
        assert_eq!(users.all().unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn set_online_flips_the_flag() {
        let dir = test_dir::scratch("users-online");
        let users = UserTable::open(dir.join("users.csv")).unwrap();

        users.login("alice").unwrap();
        users.set_online("alice", false).unwrap();

        let all = users.all().unwrap();
        assert!(!all[0].is_online);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn set_online_for_unknown_user_is_noop() {
        let dir = test_dir::scratch("users-unknown");
        let users = UserTable::open(dir.join("users.csv")).unwrap();

        users.set_online("ghost", true).unwrap();
        assert!(users.all().unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn table_survives_reopen() {
        let dir = test_dir::scratch("users-reopen");
        let path = dir.join("users.csv");

        {
            let users = UserTable::open(path.clone()).unwrap();
            users.login("alice").unwrap();
            users.login("bob").unwrap();
        }

        let users = UserTable::open(path).unwrap();
        let names: Vec<String> = users.all().unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
