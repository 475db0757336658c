//! Moderation Gate
//!
//! Everything between a staged photo and an allow/deny verdict.
//!
//! - `gate`: Verdict contract, retry budget, fail-closed policy
//! - `provider`: Collaborator seam and the HTTP provider
//! - `staging`: Scratch-file staging of fetched photo bytes

pub mod gate;
pub mod provider;
pub mod staging;

pub use gate::{ModerationGate, Verdict};
pub use provider::{HttpModerator, ModerationProvider, ProviderError};
pub use staging::StagedImage;
