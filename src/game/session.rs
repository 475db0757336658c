//! Submission Session Management
//!
//! Tracks the in-flight claim of each paying identity from payment
//! confirmation to commit. Sessions live only in memory: a restart drops
//! them (the payment event can be replayed by the gateway). There is no
//! session timeout; an abandoned session sits until the same identity pays
//! again and replaces it.

use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::game::ledger::UserId;

/// Where a submission stands. Payment confirmation creates the session;
/// a successful commit destroys it, so those ends of the lifecycle have no
/// stage of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStage {
    /// Paid, deciding whether the handle is shown on the throne.
    AwaitingPrivacyChoice,
    /// Waiting for a photo and caption. Re-entered after every rejection.
    AwaitingPhoto,
    /// Photo handed to the moderation gate; no other submission accepted.
    Moderating,
}

/// One paid, uncommitted claim.
#[derive(Debug, Clone)]
pub struct Session {
    /// The paying identity.
    pub user_id: UserId,
    /// Amount actually paid. Survives rejections; drives the next price.
    pub paid: u64,
    /// Handle snapshot taken from the payment event, without the `@`.
    pub handle: Option<String>,
    /// Privacy choice. None until chosen; commit defaults to showing the
    /// handle, matching the prompt's preselected option.
    pub show_handle: Option<bool>,
    /// Current pipeline stage.
    pub stage: SubmissionStage,
    /// When the payment confirmed. Logged when a later payment replaces
    /// this session.
    pub opened_at: Instant,
}

impl Session {
    /// A fresh session at the privacy-choice stage.
    pub fn open(user_id: UserId, paid: u64, handle: Option<String>) -> Self {
        Self {
            user_id,
            paid,
            handle,
            show_handle: None,
            stage: SubmissionStage::AwaitingPrivacyChoice,
            opened_at: Instant::now(),
        }
    }
}

/// All open sessions, keyed by identity. One session per identity; a new
/// payment replaces whatever was open.
pub struct SessionStore {
    sessions: RwLock<BTreeMap<UserId, Session>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Inserts a session, returning the one it replaced (if any).
    pub async fn open(&self, session: Session) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.user_id, session)
    }

    /// Snapshot of an identity's session.
    pub async fn get(&self, user_id: UserId) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions.get(&user_id).cloned()
    }

    /// Mutates an identity's session under the write lock. Returns None if
    /// no session is open.
    pub async fn update<T>(
        &self,
        user_id: UserId,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Option<T> {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(&user_id).map(f)
    }

    /// Removes and returns an identity's session.
    pub async fn remove(&self, user_id: UserId) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&user_id)
    }

    /// Number of open sessions.
    pub async fn count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
