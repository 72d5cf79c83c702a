//! User/progress persistence.
//!
//! `ProgressStore` is the seam the round engine writes through; the concrete
//! implementation is a single JSON file with write-to-temp-then-rename
//! atomicity. Every operation is a fresh read-modify-write of one user's
//! record under an internal mutex, so a crash mid-write never leaves a
//! half-written file behind and concurrent operations never lose updates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::domain::{HistoryEntry, Role, UserRecord};
use crate::error::StoreError;

pub trait ProgressStore: Send + Sync {
  fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;
  /// Returns false (and stores nothing) when the username is taken.
  fn add_user(&self, record: UserRecord) -> Result<bool, StoreError>;
  /// Overwrite a student's current level. Errors on unknown users or admins.
  fn update_level(&self, username: &str, level: u8) -> Result<(), StoreError>;
  /// Append exactly one round outcome to a student's history.
  fn append_history(&self, username: &str, entry: HistoryEntry) -> Result<(), StoreError>;
  fn list_students(&self) -> Result<Vec<UserRecord>, StoreError>;
}

/// On-disk shape: a map keyed by username, record fields inlined.
#[derive(Serialize, Deserialize)]
struct PersistedUser {
  password_hash: String,
  #[serde(flatten)]
  role: Role,
}

pub struct JsonFileStore {
  path: PathBuf,
  /// One read-modify-write cycle at a time; the file itself carries no lock.
  io: Mutex<()>,
}

impl JsonFileStore {
  /// Open the store, creating the file with a single admin account when it
  /// does not exist yet (first run).
  #[instrument(level = "info", skip(admin_password_hash))]
  pub fn open(
    path: impl AsRef<Path> + std::fmt::Debug,
    admin_username: &str,
    admin_password_hash: &str,
  ) -> Result<Self, StoreError> {
    let store = Self { path: path.as_ref().to_path_buf(), io: Mutex::new(()) };
    if !store.path.exists() {
      warn!(target: "lectura_backend", path = %store.path.display(), %admin_username,
            "Store file not found; creating it with the admin account");
      let mut users = BTreeMap::new();
      users.insert(
        admin_username.to_string(),
        PersistedUser { password_hash: admin_password_hash.to_string(), role: Role::Admin },
      );
      store.save(&users)?;
    }
    Ok(store)
  }

  fn lock_io(&self) -> MutexGuard<'_, ()> {
    self.io.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn load(&self) -> Result<BTreeMap<String, PersistedUser>, StoreError> {
    let content = std::fs::read_to_string(&self.path)?;
    if content.trim().is_empty() {
      return Ok(BTreeMap::new());
    }
    serde_json::from_str(&content).map_err(|e| StoreError::Corrupt(e.to_string()))
  }

  fn save(&self, users: &BTreeMap<String, PersistedUser>) -> Result<(), StoreError> {
    let tmp = self.path.with_extension("tmp");
    let body =
      serde_json::to_string_pretty(users).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, &self.path)?;
    Ok(())
  }

  fn to_record(username: &str, p: &PersistedUser) -> UserRecord {
    UserRecord {
      username: username.to_string(),
      password_hash: p.password_hash.clone(),
      role: p.role.clone(),
    }
  }
}

impl ProgressStore for JsonFileStore {
  fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
    let _io = self.lock_io();
    let users = self.load()?;
    Ok(users.get(username).map(|p| Self::to_record(username, p)))
  }

  fn add_user(&self, record: UserRecord) -> Result<bool, StoreError> {
    let _io = self.lock_io();
    let mut users = self.load()?;
    if users.contains_key(&record.username) {
      return Ok(false);
    }
    info!(target: "lectura_backend", username = %record.username, "Registering user");
    users.insert(
      record.username,
      PersistedUser { password_hash: record.password_hash, role: record.role },
    );
    self.save(&users)?;
    Ok(true)
  }

  fn update_level(&self, username: &str, level: u8) -> Result<(), StoreError> {
    let _io = self.lock_io();
    let mut users = self.load()?;
    let user = users
      .get_mut(username)
      .ok_or_else(|| StoreError::UnknownUser(username.to_string()))?;
    match &mut user.role {
      Role::Admin => {
        return Err(StoreError::Corrupt(format!("admin account {username} has no level")))
      }
      Role::Student { current_level, .. } => *current_level = level,
    }
    self.save(&users)
  }

  fn append_history(&self, username: &str, entry: HistoryEntry) -> Result<(), StoreError> {
    let _io = self.lock_io();
    let mut users = self.load()?;
    let user = users
      .get_mut(username)
      .ok_or_else(|| StoreError::UnknownUser(username.to_string()))?;
    match &mut user.role {
      Role::Admin => {
        return Err(StoreError::Corrupt(format!("admin account {username} has no history")))
      }
      Role::Student { current_level, history } => {
        *current_level = entry.level_after;
        history.push(entry);
      }
    }
    self.save(&users)
  }

  fn list_students(&self) -> Result<Vec<UserRecord>, StoreError> {
    let _io = self.lock_io();
    let users = self.load()?;
    Ok(
      users
        .iter()
        .filter(|(_, p)| matches!(p.role, Role::Student { .. }))
        .map(|(name, p)| Self::to_record(name, p))
        .collect(),
    )
  }
}

#[cfg(test)]
pub(crate) mod memory {
  //! In-memory store for state-machine tests.

  use std::collections::HashMap;
  use std::sync::Mutex;

  use super::*;

  #[derive(Default)]
  pub struct MemoryStore {
    users: Mutex<HashMap<String, UserRecord>>,
    /// When set, every write fails; lets tests exercise the degraded path.
    pub fail_writes: std::sync::atomic::AtomicBool,
  }

  impl MemoryStore {
    fn check_writable(&self) -> Result<(), StoreError> {
      if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
        Err(StoreError::Io(std::io::Error::other("simulated store outage")))
      } else {
        Ok(())
      }
    }
  }

  impl ProgressStore for MemoryStore {
    fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
      Ok(self.users.lock().unwrap().get(username).cloned())
    }

    fn add_user(&self, record: UserRecord) -> Result<bool, StoreError> {
      self.check_writable()?;
      let mut users = self.users.lock().unwrap();
      if users.contains_key(&record.username) {
        return Ok(false);
      }
      users.insert(record.username.clone(), record);
      Ok(true)
    }

    fn update_level(&self, username: &str, level: u8) -> Result<(), StoreError> {
      self.check_writable()?;
      let mut users = self.users.lock().unwrap();
      let user =
        users.get_mut(username).ok_or_else(|| StoreError::UnknownUser(username.into()))?;
      match &mut user.role {
        Role::Admin => {
          Err(StoreError::Corrupt(format!("admin account {username} has no level")))
        }
        Role::Student { current_level, .. } => {
          *current_level = level;
          Ok(())
        }
      }
    }

    fn append_history(&self, username: &str, entry: HistoryEntry) -> Result<(), StoreError> {
      self.check_writable()?;
      let mut users = self.users.lock().unwrap();
      let user =
        users.get_mut(username).ok_or_else(|| StoreError::UnknownUser(username.into()))?;
      match &mut user.role {
        Role::Admin => {
          Err(StoreError::Corrupt(format!("admin account {username} has no history")))
        }
        Role::Student { current_level, history } => {
          *current_level = entry.level_after;
          history.push(entry);
          Ok(())
        }
      }
    }

    fn list_students(&self) -> Result<Vec<UserRecord>, StoreError> {
      Ok(
        self
          .users
          .lock()
          .unwrap()
          .values()
          .filter(|u| !u.is_admin())
          .cloned()
          .collect(),
      )
    }
  }
}
