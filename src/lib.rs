//! # Throne Auction Server
//!
//! Authoritative server for the throne game: one seat, one titleholder,
//! an escalating price. Participants pay the current price (times an
//! optional multiplier), pass their photo through a moderation gate, and
//! displace the current ruler. Every claim lands in an append-only ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     THRONE SERVER                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/            - Auction state machine                    │
//! │  ├── ledger.rs    - Append-only throne history (SQLite)      │
//! │  ├── pricing.rs   - Integer price escalation                 │
//! │  ├── access.rs    - Persistent blocklist                     │
//! │  ├── session.rs   - Per-identity submission sessions         │
//! │  ├── pipeline.rs  - Payment -> photo -> moderation -> commit │
//! │  └── admin.rs     - Password-gated admin console             │
//! │                                                              │
//! │  moderation/      - Content moderation gate                  │
//! │  ├── gate.rs      - Verdict contract, retry, fail-closed     │
//! │  ├── provider.rs  - Collaborator seam + HTTP provider        │
//! │  └── staging.rs   - Scratch-file photo staging               │
//! │                                                              │
//! │  network/         - Collaborator boundary (non-game)         │
//! │  ├── server.rs    - WebSocket server, peer routing           │
//! │  ├── protocol.rs  - Tagged JSON messages                     │
//! │  ├── auth.rs      - JWT peer authentication                  │
//! │  ├── rate.rs      - Sliding-window rate limiting             │
//! │  └── files.rs     - Photo file-storage client                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Single-current-record guarantee
//!
//! The ledger record with the highest id is the one current throne. Every
//! mutation of the history (append, single-step rollback, full reset) runs
//! as one critical section over the store, so a commit can never race an
//! administrative rollback into deleting the wrong record. Moderation is
//! fail-closed: when the collaborator cannot produce a verdict, the photo
//! is denied, never waved through.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod moderation;
pub mod network;

// Re-export commonly used types
pub use game::ledger::{ThroneLedger, ThroneRecord, UserId};
pub use game::pipeline::SubmissionPipeline;
pub use game::session::{Session, SubmissionStage};
pub use moderation::gate::{ModerationGate, Verdict};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Asking price of the seed record, and so the opening price of the game.
pub const SEED_PRICE: u64 = 1;

/// Caption carried by the seed record.
pub const SEED_CAPTION: &str = "Throne awaits its first ruler";

/// Longest caption a claimant may attach, counted in characters.
pub const CAPTION_MAX_CHARS: usize = 100;

/// Display form of a claimant who chose not to show a handle.
pub const ANONYMOUS_MARKER: &str = "Anonymous";

/// Rough USD value of one payment unit, for the front-end price estimate.
pub const USD_PER_STAR: f64 = 0.013;
