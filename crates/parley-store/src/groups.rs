//! The group table.
//!
//! One row per group ever created; the member list is semicolon-separated
//! inside the last column. A group record survives an empty member list.
//! Mutations rewrite the table in full.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::error::StoreError;
use crate::table;

const HEADER: &str = "groupName,createdBy,createdAt,members";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub name: String,
    pub created_by: String,
    pub created_at: u64,
    pub members: Vec<String>,
}

pub struct GroupTable {
    path: PathBuf,
    lock: Mutex<()>,
}

impl GroupTable {
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        table::init_table(&path, HEADER)?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Create a group with `creator` as its first member.
    /// Returns false (and changes nothing) if the name already exists.
    pub fn create(&self, name: &str, creator: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let groups = self.read_all()?;
        if groups.iter().any(|g| g.name == name) {
            return Ok(false);
        }

        let row = format!(
            "{},{},{},{}",
            table::escape(name),
            table::escape(creator),
            table::unix_now(),
            table::escape(creator),
        );
        table::append_row(&self.path, &row)?;
        Ok(true)
    }

    /// Add a member. Idempotent; returns false if the group does not exist.
    pub fn add_member(&self, name: &str, username: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut groups = self.read_all()?;

        let Some(group) = groups.iter_mut().find(|g| g.name == name) else {
            return Ok(false);
        };
        if !group.members.iter().any(|m| m == username) {
            group.members.push(username.to_owned());
            self.write_all(&groups)?;
        }
        Ok(true)
    }

    /// Remove a member. The record stays even when the list empties.
    pub fn remove_member(&self, name: &str, username: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut groups = self.read_all()?;

        let Some(group) = groups.iter_mut().find(|g| g.name == name) else {
            return Ok(false);
        };
        let before = group.members.len();
        group.members.retain(|m| m != username);
        if group.members.len() != before {
            self.write_all(&groups)?;
        }
        Ok(true)
    }

    /// Members of a group. Empty for an unknown group.
    pub fn members(&self, name: &str) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .read_all()?
            .into_iter()
            .find(|g| g.name == name)
            .map(|g| g.members)
            .unwrap_or_default())
    }

    /// Every group, paired with whether `username` is a member.
    pub fn memberships(&self, username: &str) -> Result<Vec<(String, bool)>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .read_all()?
            .into_iter()
            .map(|g| {
                let is_member = g.members.iter().any(|m| m == username);
                (g.name, is_member)
            })
            .collect())
    }

    fn read_all(&self) -> Result<Vec<GroupRecord>, StoreError> {
        let mut groups = Vec::new();
        for row in table::read_rows(&self.path)? {
            match parse_row(&row) {
                Some(group) => groups.push(group),
                None => tracing::warn!(row = %row, "skipping corrupt group row"),
            }
        }
        Ok(groups)
    }

    fn write_all(&self, groups: &[GroupRecord]) -> Result<(), StoreError> {
        let rows: Vec<String> = groups
            .iter()
            .map(|g| {
                format!(
                    "{},{},{},{}",
                    table::escape(&g.name),
                    table::escape(&g.created_by),
                    g.created_at,
                    g.members
                        .iter()
                        .map(|m| table::escape(m))
                        .collect::<Vec<_>>()
                        .join(";"),
                )
            })
            .collect();
        table::rewrite(&self.path, HEADER, &rows)?;
        Ok(())
    }
}

fn parse_row(row: &str) -> Option<GroupRecord> {
    let parts: Vec<&str> = row.splitn(4, ',').collect();
    if parts.len() < 4 {
        return None;
    }
    Some(GroupRecord {
        name: parts[0].to_owned(),
        created_by: parts[1].to_owned(),
        created_at: parts[2].parse().ok()?,
        members: parts[3]
            .split(';')
            .filter(|m| !m.is_empty())
            .map(str::to_owned)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_dir;

    #[test]
    fn create_is_first_writer_wins() {
        let dir = test_dir::scratch("groups-create");
        let groups = GroupTable::open(dir.join("groups.csv")).unwrap();

        assert!(groups.create("lunch", "alice").unwrap());
        assert!(!groups.create("lunch", "bob").unwrap());

        let members = groups.members("lunch").unwrap();
        assert_eq!(members, vec!["alice"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn add_member_is_idempotent() {
        let dir = test_dir::scratch("groups-add");
        let groups = GroupTable::open(dir.join("groups.csv")).unwrap();

        groups.create("lunch", "alice").unwrap();
        assert!(groups.add_member("lunch", "bob").unwrap());
        assert!(groups.add_member("lunch", "bob").unwrap());
        assert_eq!(groups.members("lunch").unwrap(), vec!["alice", "bob"]);

        // Unknown group is reported, not created.
        assert!(!groups.add_member("dinner", "bob").unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn record_survives_empty_member_list() {
        let dir = test_dir::scratch("groups-empty");
        let groups = GroupTable::open(dir.join("groups.csv")).unwrap();

        groups.create("lunch", "alice").unwrap();
        groups.remove_member("lunch", "alice").unwrap();

        assert!(groups.members("lunch").unwrap().is_empty());
        // The row is still there: re-creating fails.
        assert!(!groups.create("lunch", "bob").unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn memberships_flags_every_group() {
        let dir = test_dir::scratch("groups-membership");
        let groups = GroupTable::open(dir.join("groups.csv")).unwrap();

        groups.create("lunch", "alice").unwrap();
        groups.create("chess", "bob").unwrap();
        groups.add_member("chess", "alice").unwrap();

        let mut memberships = groups.memberships("alice").unwrap();
        memberships.sort();
        assert_eq!(
            memberships,
            vec![("chess".to_string(), true), ("lunch".to_string(), true)]
        );

        let memberships = groups.memberships("carol").unwrap();
        assert!(memberships.iter().all(|(_, is_member)| !is_member));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn table_survives_reopen() {
        let dir = test_dir::scratch("groups-reopen");
        let path = dir.join("groups.csv");

        {
            let groups = GroupTable::open(path.clone()).unwrap();
            groups.create("lunch", "alice").unwrap();
            groups.add_member("lunch", "bob").unwrap();
        }

        let groups = GroupTable::open(path).unwrap();
        assert_eq!(groups.members("lunch").unwrap(), vec!["alice", "bob"]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
