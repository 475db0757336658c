//! Network Layer
//!
//! The collaborator boundary: WebSocket peers (the messaging/payment
//! gateway and read-only front-ends) exchange tagged JSON with the game.
//! Nothing in here decides auction outcomes - all of that runs in `game/`.

pub mod auth;
pub mod files;
pub mod protocol;
pub mod rate;
pub mod server;

pub use auth::{validate_token, AuthConfig, AuthError, TokenClaims};
pub use files::{FileStoreError, HttpPhotoStore, PhotoStore};
pub use protocol::{ClientMessage, ErrorCode, PeerRole, ServerMessage, ThroneView};
pub use rate::RateLimiter;
pub use server::{ServerConfig, ThroneServer, ThroneServerError};
