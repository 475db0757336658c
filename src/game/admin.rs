//! Admin Console
//!
//! Password-gated command surface over the ledger and the blocklist. One
//! shared secret gates everything; authorization lives in a single
//! process-wide slot, so interleaved administrators share (and race) it.
//!
//! Multi-step flows carry an explicit pending tag instead of overloading
//! one awaiting-password state: blocking waits for a typed numeric target,
//! a reset waits for the password a second time. Any wrong password, and
//! any input that does not fit the pending tag, clears the whole slot and
//! answers the same generic rejection.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::game::access::{BlockEntry, Blocklist, DEFAULT_BLOCK_REASON};
use crate::game::ledger::{ThroneLedger, ThroneRecord, UserId};

/// History entries shown when the admin does not ask for a count.
pub const DEFAULT_HISTORY_LIMIT: u32 = 10;

/// Admin console configuration. Only a digest of the shared secret is
/// kept in memory.
#[derive(Clone)]
pub struct AdminConfig {
    secret_digest: [u8; 32],
}

impl AdminConfig {
    /// Config from a plaintext shared secret.
    pub fn new(secret: &str) -> Self {
        Self {
            secret_digest: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    /// Config from the `ADMIN_PASSWORD` environment variable.
    pub fn from_env() -> Option<Self> {
        std::env::var("ADMIN_PASSWORD").ok().map(|s| Self::new(&s))
    }

    fn verify(&self, attempt: &str) -> bool {
        let digest: [u8; 32] = Sha256::digest(attempt.as_bytes()).into();
        digest == self.secret_digest
    }
}

/// The continuation a password or typed input is expected to complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingAction {
    /// Plain login: next password grants authorization.
    Login,
    /// Reset armed: next password runs the reset.
    ConfirmReset,
    /// Block armed: next input is the numeric target.
    BlockTarget,
}

/// The single process-wide authorization slot.
#[derive(Debug, Default)]
struct AdminState {
    authorized: bool,
    pending: Option<PendingAction>,
    opened_at: Option<Instant>,
}

impl AdminState {
    fn clear(&mut self) {
        *self = AdminState::default();
    }
}

/// Privileged commands, one tagged variant per step with its own input
/// schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AdminRequest {
    /// Begin a login; the console prompts for the password.
    Open,
    /// The password, consumed by whichever flow is pending.
    Password {
        /// The shared secret attempt.
        secret: String,
    },
    /// Show the newest ledger records.
    ViewHistory {
        /// How many records; defaults to [`DEFAULT_HISTORY_LIMIT`].
        limit: Option<u32>,
    },
    /// Delete the newest record, restoring the previous throne.
    Rollback,
    /// Arm a block; the console prompts for the target identity.
    BlockUser,
    /// The numeric block target, valid only while a block is armed.
    BlockTarget {
        /// Identity to block.
        user_id: UserId,
        /// Optional reason; a default is recorded when absent.
        reason: Option<String>,
    },
    /// Arm a full reset; the console demands the password again.
    ResetDatabase,
    /// Show the blocklist.
    ViewBlocklist {
        /// How many entries; defaults to [`DEFAULT_HISTORY_LIMIT`].
        limit: Option<u32>,
    },
}

/// Console replies. Auth failures of every kind collapse into
/// [`AdminReply::Rejected`], with no hint which step went wrong.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum AdminReply {
    /// Enter the password.
    PasswordPrompt,
    /// Login accepted; commands are available.
    Authorized,
    /// Wrong password or out-of-order input. The slot was cleared.
    Rejected,
    /// The requested history, newest first.
    History {
        /// Ledger records.
        entries: Vec<ThroneRecord>,
    },
    /// Rollback done; `current` is the restored throne.
    RolledBack {
        /// The record now current.
        current: ThroneRecord,
    },
    /// Rollback refused: only the seed (or a single record) remains.
    NothingToRollBack,
    /// Send the numeric identity to block.
    BlockTargetPrompt,
    /// The identity is now blocked.
    Blocked {
        /// The blocked identity.
        user_id: UserId,
    },
    /// Re-enter the password to confirm the reset.
    ConfirmResetPrompt,
    /// History wiped and reseeded. The blocklist was left alone.
    ResetComplete,
    /// The blocklist contents.
    BlocklistEntries {
        /// Block entries ordered by identity.
        entries: Vec<BlockEntry>,
    },
    /// A storage operation failed.
    Failure {
        /// What went wrong.
        message: String,
    },
}

/// The admin console. One per process, shared across connections.
pub struct AdminConsole {
    config: AdminConfig,
    ledger: Arc<ThroneLedger>,
    blocklist: Blocklist,
    state: RwLock<AdminState>,
}

impl AdminConsole {
    /// Builds the console over the shared ledger.
    pub fn new(config: AdminConfig, ledger: Arc<ThroneLedger>) -> Self {
        let blocklist = ledger.blocklist();
        Self {
            config,
            ledger,
            blocklist,
            state: RwLock::new(AdminState::default()),
        }
    }

    /// Processes one admin request and answers with exactly one reply.
    pub async fn handle(&self, request: AdminRequest) -> AdminReply {
        match request {
            AdminRequest::Open => self.open().await,
            AdminRequest::Password { secret } => self.password(&secret).await,
            AdminRequest::ViewHistory { limit } => {
                match self.authorized_then(|| {
                    self.ledger.recent(limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
                })
                .await
                {
                    Ok(Ok(entries)) => AdminReply::History { entries },
                    Ok(Err(e)) => failure(e),
                    Err(rejected) => rejected,
                }
            }
            AdminRequest::Rollback => {
                match self.authorized_then(|| self.ledger.rollback_last()).await {
                    Ok(Ok(true)) => match self.ledger.current() {
                        Ok(current) => {
                            info!(restored_id = current.id, "ledger rolled back");
                            AdminReply::RolledBack { current }
                        }
                        Err(e) => failure(e),
                    },
                    Ok(Ok(false)) => AdminReply::NothingToRollBack,
                    Ok(Err(e)) => failure(e),
                    Err(rejected) => rejected,
                }
            }
            AdminRequest::BlockUser => {
                let mut state = self.state.write().await;
                if !state.authorized {
                    state.clear();
                    return AdminReply::Rejected;
                }
                state.pending = Some(PendingAction::BlockTarget);
                AdminReply::BlockTargetPrompt
            }
            AdminRequest::BlockTarget { user_id, reason } => {
                self.block_target(user_id, reason).await
            }
            AdminRequest::ResetDatabase => {
                let mut state = self.state.write().await;
                if !state.authorized {
                    state.clear();
                    return AdminReply::Rejected;
                }
                state.pending = Some(PendingAction::ConfirmReset);
                AdminReply::ConfirmResetPrompt
            }
            AdminRequest::ViewBlocklist { limit } => {
                match self.authorized_then(|| {
                    self.blocklist.entries(limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
                })
                .await
                {
                    Ok(Ok(entries)) => AdminReply::BlocklistEntries { entries },
                    Ok(Err(e)) => failure(e),
                    Err(rejected) => rejected,
                }
            }
        }
    }

    async fn open(&self) -> AdminReply {
        let mut state = self.state.write().await;
        state.authorized = false;
        state.pending = Some(PendingAction::Login);
        state.opened_at = Some(Instant::now());
        AdminReply::PasswordPrompt
    }

    async fn password(&self, secret: &str) -> AdminReply {
        let mut state = self.state.write().await;

        // There is no expiry; surface the slot's age so stale logins are
        // at least visible in the logs.
        if let Some(opened_at) = state.opened_at {
            info!(
                pending = ?state.pending,
                open_for_secs = opened_at.elapsed().as_secs(),
                "admin password check"
            );
        }

        match state.pending {
            Some(PendingAction::Login) if self.config.verify(secret) => {
                state.authorized = true;
                state.pending = None;
                AdminReply::Authorized
            }
            Some(PendingAction::ConfirmReset)
                if state.authorized && self.config.verify(secret) =>
            {
                state.clear();
                match self.ledger.reset() {
                    Ok(()) => {
                        warn!("ledger reset by admin");
                        AdminReply::ResetComplete
                    }
                    Err(e) => failure(e),
                }
            }
            _ => {
                state.clear();
                AdminReply::Rejected
            }
        }
    }

    async fn block_target(&self, user_id: UserId, reason: Option<String>) -> AdminReply {
        let mut state = self.state.write().await;
        if !state.authorized || state.pending != Some(PendingAction::BlockTarget) {
            state.clear();
            return AdminReply::Rejected;
        }
        state.clear();
        drop(state);

        let reason = reason.unwrap_or_else(|| DEFAULT_BLOCK_REASON.to_string());
        match self.blocklist.block(user_id, &reason) {
            Ok(()) => {
                warn!(user_id, reason, "identity blocked by admin");
                AdminReply::Blocked { user_id }
            }
            Err(e) => failure(e),
        }
    }

    /// Runs `f` only when the slot is authorized; a plain command never
    /// disturbs an armed flow. Unauthorized commands clear the slot.
    async fn authorized_then<T>(&self, f: impl FnOnce() -> T) -> Result<T, AdminReply> {
        let mut state = self.state.write().await;
        if !state.authorized {
            state.clear();
            return Err(AdminReply::Rejected);
        }
        Ok(f())
    }
}

fn failure(e: impl std::fmt::Display) -> AdminReply {
    AdminReply::Failure {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ledger::ThroneClaim;
    use crate::SEED_PRICE;

    const SECRET: &str = "correct horse battery staple";

    fn console() -> AdminConsole {
        let ledger = Arc::new(ThroneLedger::open_in_memory().unwrap());
        AdminConsole::new(AdminConfig::new(SECRET), ledger)
    }

    async fn login(console: &AdminConsole) {
        assert!(matches!(
            console.handle(AdminRequest::Open).await,
            AdminReply::PasswordPrompt
        ));
        assert!(matches!(
            console
                .handle(AdminRequest::Password {
                    secret: SECRET.into()
                })
                .await,
            AdminReply::Authorized
        ));
    }

    fn append(console: &AdminConsole, user_id: UserId, price: u64) {
        console
            .ledger
            .append(ThroneClaim {
                user_id,
                price,
                photo_ref: "photo".into(),
                caption: String::new(),
                display: format!("@u{user_id}"),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_login_then_history() {
        let console = console();
        login(&console).await;
        append(&console, 1, 2);

        let reply = console.handle(AdminRequest::ViewHistory { limit: None }).await;
        match reply {
            AdminReply::History { entries } => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].user_id, 1);
            }
            other => panic!("expected history, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_password_clears_slot() {
        let console = console();
        console.handle(AdminRequest::Open).await;
        let reply = console
            .handle(AdminRequest::Password {
                secret: "guess".into(),
            })
            .await;
        assert!(matches!(reply, AdminReply::Rejected));

        // Slot cleared: the right password now has no pending login
        let reply = console
            .handle(AdminRequest::Password {
                secret: SECRET.into(),
            })
            .await;
        assert!(matches!(reply, AdminReply::Rejected));
    }

    #[tokio::test]
    async fn test_commands_require_authorization() {
        let console = console();
        for request in [
            AdminRequest::ViewHistory { limit: None },
            AdminRequest::Rollback,
            AdminRequest::BlockUser,
            AdminRequest::ResetDatabase,
            AdminRequest::ViewBlocklist { limit: None },
        ] {
            assert!(matches!(
                console.handle(request).await,
                AdminReply::Rejected
            ));
        }
    }

    #[tokio::test]
    async fn test_rollback_reports_both_ways() {
        let console = console();
        login(&console).await;

        assert!(matches!(
            console.handle(AdminRequest::Rollback).await,
            AdminReply::NothingToRollBack
        ));

        append(&console, 1, 2);
        match console.handle(AdminRequest::Rollback).await {
            AdminReply::RolledBack { current } => assert_eq!(current.user_id, 0),
            other => panic!("expected rollback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_block_flow() {
        let console = console();
        login(&console).await;

        assert!(matches!(
            console.handle(AdminRequest::BlockUser).await,
            AdminReply::BlockTargetPrompt
        ));
        assert!(matches!(
            console
                .handle(AdminRequest::BlockTarget {
                    user_id: 42,
                    reason: Some("spam".into())
                })
                .await,
            AdminReply::Blocked { user_id: 42 }
        ));
        assert!(console.blocklist.is_blocked(42).unwrap());

        // Completing the flow cleared the whole slot
        assert!(matches!(
            console.handle(AdminRequest::ViewHistory { limit: None }).await,
            AdminReply::Rejected
        ));
    }

    #[tokio::test]
    async fn test_block_target_requires_armed_flow() {
        let console = console();
        login(&console).await;

        // No BlockUser first: the typed target is out of order
        assert!(matches!(
            console
                .handle(AdminRequest::BlockTarget {
                    user_id: 42,
                    reason: None
                })
                .await,
            AdminReply::Rejected
        ));
        assert!(!console.blocklist.is_blocked(42).unwrap());
    }

    #[tokio::test]
    async fn test_reset_demands_second_password() {
        let console = console();
        login(&console).await;
        append(&console, 1, 2);
        console.blocklist.block(9, "spam").unwrap();

        assert!(matches!(
            console.handle(AdminRequest::ResetDatabase).await,
            AdminReply::ConfirmResetPrompt
        ));

        // Wrong confirmation aborts and clears everything
        assert!(matches!(
            console
                .handle(AdminRequest::Password {
                    secret: "nope".into()
                })
                .await,
            AdminReply::Rejected
        ));
        assert_eq!(console.ledger.record_count().unwrap(), 2);

        // Full flow again, confirmed this time
        login(&console).await;
        console.handle(AdminRequest::ResetDatabase).await;
        assert!(matches!(
            console
                .handle(AdminRequest::Password {
                    secret: SECRET.into()
                })
                .await,
            AdminReply::ResetComplete
        ));

        assert_eq!(console.ledger.record_count().unwrap(), 1);
        assert_eq!(console.ledger.current().unwrap().price, SEED_PRICE);
        // Blocklist survives the reset
        assert!(console.blocklist.is_blocked(9).unwrap());
    }

    #[tokio::test]
    async fn test_view_blocklist() {
        let console = console();
        login(&console).await;
        console.blocklist.block(3, "spam").unwrap();
        console.blocklist.block(5, "abuse").unwrap();

        match console.handle(AdminRequest::ViewBlocklist { limit: None }).await {
            AdminReply::BlocklistEntries { entries } => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].user_id, 3);
            }
            other => panic!("expected blocklist, got {other:?}"),
        }
    }
}
