//! Protocol Messages
//!
//! Wire format for peer-server communication over WebSocket. All messages
//! are tagged JSON. Two peer roles exist: the **gateway** (the
//! messaging/payment bridge, privileged, drives the auction) and the
//! **front-end** (read-only, rate-limited queries).

use serde::{Deserialize, Serialize};

use crate::game::admin::{AdminReply, AdminRequest};
use crate::game::ledger::{ThroneRecord, UserId};
use crate::USD_PER_STAR;

/// What a connecting peer is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// The messaging/payment bridge. Sends game events, receives prompts
    /// and broadcast directives.
    Gateway,
    /// A read-only consumer of current/top/photo queries.
    Frontend,
}

// =============================================================================
// PEER -> SERVER MESSAGES
// =============================================================================

/// Messages sent from a peer to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection.
    Hello {
        /// JWT issued by the deployment's auth provider.
        token: String,
        /// Role the peer wants; must match the token's role claim.
        role: PeerRole,
    },

    /// A participant asked to buy the throne (gateway).
    PurchaseRequest {
        /// The prospective claimant.
        user_id: UserId,
        /// Chosen bid multiplier, at least 1.
        multiplier: u32,
    },

    /// Payment provider pre-checkout query (gateway). Always approved.
    PreCheckout {
        /// The paying identity.
        user_id: UserId,
        /// Invoice payload, echoed back in the approval.
        payload: String,
    },

    /// A payment completed (gateway).
    PaymentSuccess {
        /// The paying identity.
        user_id: UserId,
        /// Amount actually paid.
        paid: u64,
        /// Platform handle of the payer, if they have one. No `@`.
        handle: Option<String>,
    },

    /// The claimant picked a privacy option (gateway).
    PrivacyChoice {
        /// The claimant.
        user_id: UserId,
        /// Show the handle on the throne, or stay anonymous.
        show_handle: bool,
    },

    /// The claimant sent a photo with an optional caption (gateway).
    PhotoSubmission {
        /// The claimant.
        user_id: UserId,
        /// Opaque reference into the platform's file storage.
        photo_ref: String,
        /// Caption, possibly empty.
        caption: String,
    },

    /// A privileged admin command (gateway).
    Admin(AdminRequest),

    /// Current throne query (front-end).
    QueryCurrent,

    /// Hall-of-fame query, most expensive claims first (front-end).
    QueryTop {
        /// How many entries; the server applies a default when absent.
        limit: Option<u32>,
    },

    /// Resolve a photo reference to image content (front-end).
    FetchPhoto {
        /// Opaque reference into the platform's file storage.
        photo_ref: String,
    },

    /// Ping for liveness/latency.
    Ping {
        /// Echoed back in the pong.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> PEER MESSAGES
// =============================================================================

/// Messages sent from the server to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    HelloResult {
        /// Whether the token and role were accepted.
        success: bool,
        /// The peer's client key (token subject) on success.
        client_key: Option<String>,
        /// Rejection detail on failure.
        error: Option<String>,
        /// Server version string.
        server_version: String,
    },

    /// Invoice directive answering a purchase request. The gateway turns
    /// this into a payment-provider invoice.
    Invoice {
        /// The prospective claimant.
        user_id: UserId,
        /// Asking price at quote time.
        base_price: u64,
        /// Chosen multiplier.
        multiplier: u32,
        /// Amount to invoice.
        total: u64,
        /// Opaque payload to attach to the invoice.
        payload: String,
    },

    /// Pre-checkout approval. Always granted.
    PreCheckoutApproval {
        /// The paying identity.
        user_id: UserId,
        /// Echoed invoice payload.
        payload: String,
    },

    /// Ask the gateway to prompt the claimant for the next step.
    Prompt {
        /// The claimant to prompt.
        user_id: UserId,
        /// Which prompt to render.
        prompt: PromptKind,
    },

    /// How a submission event ended.
    Outcome(SubmissionReply),

    /// Reply to an admin command.
    Admin(AdminReply),

    /// Publish a new ruler to the audience feed. Best-effort: the commit
    /// behind it already happened.
    Broadcast {
        /// Photo to publish.
        photo_ref: String,
        /// Claimant caption.
        caption: String,
        /// Handle or anonymity marker.
        display: String,
        /// Amount paid for the throne.
        paid: u64,
    },

    /// The current throne.
    CurrentThrone {
        /// Public projection of the current record.
        view: ThroneView,
    },

    /// Hall of fame, most expensive first.
    TopThrones {
        /// Public projections, seed excluded.
        entries: Vec<ThroneView>,
    },

    /// Resolved photo content.
    Photo {
        /// The reference that was resolved.
        photo_ref: String,
        /// Image bytes, base64.
        content_base64: String,
    },

    /// Pong response.
    Pong {
        /// Echoed peer timestamp.
        timestamp: u64,
        /// Server wall-clock millis.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Prompts the gateway renders for a claimant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Payment landed: pick show-handle vs anonymous, then send a photo.
    ChoosePrivacy,
    /// Privacy recorded (or a retry): send a photo with optional caption.
    SendPhoto,
}

/// Per-submission outcomes, surfaced to the claimant by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionReply {
    /// The claim committed; the claimant is the new ruler.
    Crowned {
        /// The new ruler.
        user_id: UserId,
        /// Public projection of the committed record.
        view: ThroneView,
    },
    /// Moderation refused the photo; the claimant may retry.
    Rejected {
        /// The claimant.
        user_id: UserId,
        /// Refusal reason, shown verbatim.
        reason: String,
    },
    /// The identity is blocked; no session was opened.
    AccessDenied {
        /// The refused identity.
        user_id: UserId,
    },
    /// Caption over the limit; resubmit with a shorter one.
    CaptionTooLong {
        /// The claimant.
        user_id: UserId,
        /// The character limit.
        max_chars: u32,
    },
    /// The photo could not be fetched from file storage; resend it.
    PhotoUnavailable {
        /// The claimant.
        user_id: UserId,
    },
}

/// Public projection of a ledger record: what front-ends and the audience
/// feed are allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroneView {
    /// Claimant identity (0 for the seed).
    pub user_id: UserId,
    /// Asking price this record established.
    pub price: u64,
    /// Photo reference, resolvable through the photo proxy.
    pub photo_ref: String,
    /// Claimant caption.
    pub caption: String,
    /// Handle or anonymity marker.
    pub display: String,
    /// Commit timestamp, RFC 3339.
    pub created_at: String,
    /// Rough USD value of the price, rounded to cents.
    pub usd_estimate: f64,
}

impl ThroneView {
    /// Projects a ledger record for public consumption.
    pub fn from_record(record: &ThroneRecord) -> Self {
        let usd_estimate = (record.price as f64 * USD_PER_STAR * 100.0).round() / 100.0;
        Self {
            user_id: record.user_id,
            price: record.price,
            photo_ref: record.photo_ref.clone(),
            caption: record.caption.clone(),
            display: record.display.clone(),
            created_at: record.created_at.to_rfc3339(),
            usd_estimate,
        }
    }
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// The peer's role does not permit this message.
    Forbidden,
    /// Rate limited.
    RateLimited,
    /// Invalid input.
    InvalidInput,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_client_message_json_roundtrip() {
        let msg = ClientMessage::PaymentSuccess {
            user_id: 42,
            paid: 20,
            handle: Some("alice".into()),
        };

        let json = msg.to_json().unwrap();
        let parsed = ClientMessage::from_json(&json).unwrap();

        if let ClientMessage::PaymentSuccess { user_id, paid, handle } = parsed {
            assert_eq!(user_id, 42);
            assert_eq!(paid, 20);
            assert_eq!(handle.as_deref(), Some("alice"));
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_hello_role_tags() {
        let msg = ClientMessage::Hello {
            token: "jwt".into(),
            role: PeerRole::Gateway,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"gateway\""));

        let parsed = ClientMessage::from_json(&json).unwrap();
        assert!(matches!(
            parsed,
            ClientMessage::Hello {
                role: PeerRole::Gateway,
                ..
            }
        ));
    }

    #[test]
    fn test_admin_request_embeds() {
        let msg = ClientMessage::Admin(AdminRequest::BlockTarget {
            user_id: 7,
            reason: None,
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("block_target"));

        let parsed = ClientMessage::from_json(&json).unwrap();
        assert!(matches!(
            parsed,
            ClientMessage::Admin(AdminRequest::BlockTarget { user_id: 7, .. })
        ));
    }

    #[test]
    fn test_outcome_roundtrip() {
        let msg = ServerMessage::Outcome(SubmissionReply::Rejected {
            user_id: 5,
            reason: "Politics forbidden".into(),
        });

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"outcome\":\"rejected\""));

        let parsed = ServerMessage::from_json(&json).unwrap();
        if let ServerMessage::Outcome(SubmissionReply::Rejected { user_id, reason }) = parsed {
            assert_eq!(user_id, 5);
            assert_eq!(reason, "Politics forbidden");
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_throne_view_usd_estimate() {
        let record = ThroneRecord {
            id: 3,
            user_id: 7,
            price: 110,
            photo_ref: "ref".into(),
            caption: "hi".into(),
            display: "@u7".into(),
            created_at: Utc::now(),
        };

        let view = ThroneView::from_record(&record);
        // 110 * 0.013 = 1.43
        assert_eq!(view.usd_estimate, 1.43);
        assert_eq!(view.price, 110);
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::Error(ServerError {
            code: ErrorCode::RateLimited,
            message: "Too many requests".into(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("rate_limited"));
    }

    #[test]
    fn test_prompt_kinds() {
        for prompt in [PromptKind::ChoosePrivacy, PromptKind::SendPhoto] {
            let msg = ServerMessage::Prompt { user_id: 1, prompt };
            let json = msg.to_json().unwrap();
            let _ = ServerMessage::from_json(&json).unwrap();
        }
    }

    #[test]
    fn test_unknown_message_rejected() {
        let err = ClientMessage::from_json(r#"{"type":"launch_missiles"}"#);
        assert!(err.is_err());
    }
}
