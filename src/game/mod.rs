//! Auction Game Logic
//!
//! The throne auction state machine and its stores.
//!
//! ## Module Structure
//!
//! - `ledger`: Append-only throne history, source of truth for "current"
//! - `pricing`: Integer price escalation
//! - `access`: Persistent blocklist
//! - `session`: Per-identity in-flight submission state
//! - `pipeline`: Payment -> privacy -> photo -> moderation -> commit
//! - `admin`: Password-gated administrative commands

pub mod access;
pub mod admin;
pub mod ledger;
pub mod pipeline;
pub mod pricing;
pub mod session;

// Re-export key types
pub use access::{BlockEntry, Blocklist};
pub use admin::{AdminConfig, AdminConsole, AdminReply, AdminRequest};
pub use ledger::{LedgerError, ThroneClaim, ThroneLedger, ThroneRecord, UserId};
pub use pipeline::{PaymentOutcome, PhotoOutcome, PrivacyOutcome, SubmissionPipeline};
pub use session::{Session, SessionStore, SubmissionStage};
