//! The authenticated-user session.
//!
//! One [`SessionStore`] exists per process. It holds the `user` record
//! returned by login, persists it to a JSON file so the session survives a
//! restart, and is the only authentication gate: no record means logged out.
//! The time of the last user activity is persisted with the record, so idle
//! logout also spans separate runs of the client.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{StoredUser, UserDetails};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not logged in")]
    NotAuthenticated,
    #[error("Session file error: {0}")]
    Io(#[from] io::Error),
    #[error("Session record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// On-disk shape of the session file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    user: StoredUser,
    last_activity: DateTime<Utc>,
}

struct Session {
    user: Option<StoredUser>,
    last_activity: DateTime<Utc>,
}

pub struct SessionStore {
    path: PathBuf,
    session: Mutex<Session>,
}

impl SessionStore {
    /// Opens the store, restoring a previously persisted record if one is readable.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let session = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<SessionRecord>(&bytes) {
                Ok(record) => {
                    tracing::debug!("Restored session for user {}", record.user.user_id);
                    Session { user: Some(record.user), last_activity: record.last_activity }
                }
                Err(e) => {
                    tracing::warn!("Discarding unreadable session file {}: {}", path.display(), e);
                    Session { user: None, last_activity: Utc::now() }
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Session { user: None, last_activity: Utc::now() },
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, session: Mutex::new(session) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn login(&self, user: StoredUser) -> Result<(), StoreError> {
        let now = Utc::now();
        self.persist(&SessionRecord { user: user.clone(), last_activity: now })?;
        tracing::info!("Logged in as {} ({})", user.name, user.user_id);
        let mut session = self.lock();
        session.user = Some(user);
        session.last_activity = now;
        Ok(())
    }

    /// Clears the session. Logging out twice is not an error.
    pub fn logout(&self) -> Result<(), StoreError> {
        let previous = self.lock().user.take();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(user) = previous {
            tracing::info!("Logged out user {}", user.user_id);
        }
        Ok(())
    }

    pub fn current(&self) -> Option<StoredUser> {
        self.lock().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().user.is_some()
    }

    pub fn require_user(&self) -> Result<StoredUser, StoreError> {
        self.current().ok_or(StoreError::NotAuthenticated)
    }

    /// Updates the cached balance from a fresh `user/details` read.
    pub fn apply_details(&self, details: &UserDetails) -> Result<(), StoreError> {
        let record = {
            let mut session = self.lock();
            let last_activity = session.last_activity;
            let user = session.user.as_mut().ok_or(StoreError::NotAuthenticated)?;
            if user.user_id != details.user_id {
                return Err(StoreError::NotAuthenticated);
            }
            user.coins_earned = details.coins_earned;
            user.name = details.name.clone();
            SessionRecord { user: user.clone(), last_activity }
        };
        self.persist(&record)
    }

    /// Resets the inactivity clock and persists it with the session.
    pub fn record_activity(&self) {
        let record = {
            let mut session = self.lock();
            session.last_activity = Utc::now();
            match &session.user {
                Some(user) => SessionRecord { user: user.clone(), last_activity: session.last_activity },
                None => return,
            }
        };
        if let Err(e) = self.persist(&record) {
            tracing::warn!("Could not persist session activity: {}", e);
        }
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.lock().last_activity
    }

    pub fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_activity()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Logs out when there has been no activity for `timeout`. Returns whether it did.
    pub fn logout_if_idle(&self, timeout: Duration) -> Result<bool, StoreError> {
        let idle = self.idle_for();
        if !self.is_authenticated() || idle < timeout {
            return Ok(false);
        }
        tracing::info!("Session idle for {:?}, logging out", idle);
        self.logout()?;
        Ok(true)
    }

    fn persist(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    fn user(coins: u64) -> StoredUser {
        StoredUser {
            user_id: UserId(42),
            name: "Jane".into(),
            coins_earned: coins,
            customer_no: Some(serde_json::json!("C-77")),
            extra: Default::default(),
        }
    }

    #[test]
    fn login_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = SessionStore::open(&path).unwrap();
        assert!(matches!(store.require_user(), Err(StoreError::NotAuthenticated)));
        store.login(user(120)).unwrap();

        let reopened = SessionStore::open(&path).unwrap();
        assert_eq!(reopened.require_user().unwrap(), user(120));
    }

    #[test]
    fn logout_is_idempotent_and_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::open(&path).unwrap();
        store.login(user(1)).unwrap();

        store.logout().unwrap();
        store.logout().unwrap();
        assert!(!path.exists());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn corrupt_file_means_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, b"{ nope").unwrap();
        assert!(!SessionStore::open(&path).unwrap().is_authenticated());
    }

    #[test]
    fn details_refresh_cached_coins() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("s.json")).unwrap();
        store.login(user(10)).unwrap();
        store
            .apply_details(&UserDetails {
                user_id: UserId(42),
                name: "Jane".into(),
                coins_earned: 90,
                user_points: 520,
                congratulated_silver: Some(false),
                congratulated_gold: Some(false),
            })
            .unwrap();
        assert_eq!(store.require_user().unwrap().coins_earned, 90);
        assert_eq!(store.require_user().unwrap().customer_no, Some(serde_json::json!("C-77")));
    }

    fn backdate(path: &Path, by: chrono::Duration) {
        let mut record: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        record["lastActivity"] = serde_json::json!(Utc::now() - by);
        fs::write(path, serde_json::to_vec(&record).unwrap()).unwrap();
    }

    #[test]
    fn idle_time_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::open(&path).unwrap();
        store.login(user(10)).unwrap();
        drop(store);

        backdate(&path, chrono::Duration::seconds(10_000));
        let reopened = SessionStore::open(&path).unwrap();
        assert!(reopened.idle_for() >= Duration::from_secs(9_999));
        assert!(reopened.logout_if_idle(Duration::from_millis(2_000_000)).unwrap());
        assert!(!reopened.is_authenticated());
        assert!(!path.exists());
    }

    #[test]
    fn recent_activity_keeps_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::open(&path).unwrap();
        store.login(user(10)).unwrap();

        backdate(&path, chrono::Duration::seconds(1_000));
        let reopened = SessionStore::open(&path).unwrap();
        assert!(!reopened.logout_if_idle(Duration::from_millis(2_000_000)).unwrap());

        backdate(&path, chrono::Duration::seconds(10_000));
        let reopened = SessionStore::open(&path).unwrap();
        reopened.record_activity();
        assert!(!reopened.logout_if_idle(Duration::from_millis(2_000_000)).unwrap());
        assert!(SessionStore::open(&path).unwrap().idle_for() < Duration::from_secs(60));
    }
}
