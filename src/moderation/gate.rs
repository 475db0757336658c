//! Moderation Gate
//!
//! Mediates every photo submission through the external moderation
//! collaborator. Two policies live here, by name, independent of how the
//! request loop is written:
//!
//! - **Verdict contract**: a response starting with `OK` allows; one starting
//!   with `FAIL` denies, carrying the remainder as the human-readable reason;
//!   anything else denies with [`REASON_UNKNOWN_RESPONSE`].
//! - **Fail-closed**: provider faults are retried up to
//!   [`MODERATION_ATTEMPTS`] total attempts with [`RETRY_DELAY`] between
//!   them; if every attempt faults, the verdict is a deny with
//!   [`REASON_UNAVAILABLE`]. A moderation outage can never crown anyone.

use std::time::Duration;

use tracing::{debug, warn};

use crate::moderation::provider::{ModerationProvider, ProviderError};
use crate::moderation::staging::StagedImage;

/// Total attempts against the provider before failing closed.
pub const MODERATION_ATTEMPTS: u32 = 2;

/// Pause between attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Deny reason when the provider answers with something that is neither
/// `OK` nor `FAIL`.
pub const REASON_UNKNOWN_RESPONSE: &str = "unknown response";

/// Deny reason when every attempt faults. The fail-closed verdict.
pub const REASON_UNAVAILABLE: &str = "service temporarily unavailable";

/// Outcome of a moderation review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The photo may be published.
    Allow,
    /// The photo was refused; `reason` is surfaced to the submitter.
    Deny {
        /// Human-readable refusal reason.
        reason: String,
    },
}

impl Verdict {
    /// Parses a raw provider response per the verdict contract.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("OK") {
            Verdict::Allow
        } else if let Some(rest) = trimmed.strip_prefix("FAIL") {
            let reason = rest.strip_prefix(':').unwrap_or(rest).trim();
            Verdict::deny(reason)
        } else {
            Verdict::deny(REASON_UNKNOWN_RESPONSE)
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Verdict::Deny {
            reason: reason.into(),
        }
    }
}

/// The gate: one provider plus the retry and fail-closed policy.
pub struct ModerationGate<M> {
    provider: M,
    retry_delay: Duration,
}

impl<M: ModerationProvider> ModerationGate<M> {
    /// Wraps a provider with the standard [`RETRY_DELAY`].
    pub fn new(provider: M) -> Self {
        Self::with_retry_delay(provider, RETRY_DELAY)
    }

    /// Wraps a provider with an explicit delay between attempts. Tests use a
    /// zero delay.
    pub fn with_retry_delay(provider: M, retry_delay: Duration) -> Self {
        Self {
            provider,
            retry_delay,
        }
    }

    /// Reviews a staged image. Always returns a verdict: faults beyond the
    /// retry budget become the fail-closed deny, never an allow.
    pub async fn review(&self, image: &StagedImage) -> Verdict {
        let mut last_fault: Option<ProviderError> = None;

        for attempt in 1..=MODERATION_ATTEMPTS {
            match self.provider.review(image).await {
                Ok(raw) => {
                    debug!(attempt, response = raw.trim(), "moderation verdict received");
                    return Verdict::parse(&raw);
                }
                Err(fault) => {
                    warn!(attempt, error = %fault, "moderation provider fault");
                    last_fault = Some(fault);
                    if attempt < MODERATION_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        // Fail closed: the budget is spent, the photo stays off the throne.
        warn!(
            attempts = MODERATION_ATTEMPTS,
            last_fault = %last_fault.map(|f| f.to_string()).unwrap_or_default(),
            "moderation attempts exhausted, denying"
        );
        Verdict::deny(REASON_UNAVAILABLE)
    }
}
