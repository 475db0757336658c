//! Submission Pipeline
//!
//! Drives a paid claim from the payment-success event through the privacy
//! choice, photo collection, the moderation gate, and finally the ledger
//! commit. One orchestrator owns all the subsystem handles; the network
//! layer feeds it events and renders the typed outcomes it returns.
//!
//! The blocklist is consulted exactly once, when a payment event is about
//! to open a session. A block recorded while a session is already in
//! flight does not stop that session's commit.

use std::sync::Arc;

use tracing::{info, warn};

use crate::game::access::Blocklist;
use crate::game::ledger::{LedgerError, ThroneClaim, ThroneLedger, ThroneRecord, UserId};
use crate::game::pricing;
use crate::game::session::{Session, SessionStore, SubmissionStage};
use crate::moderation::gate::{ModerationGate, Verdict};
use crate::moderation::provider::ModerationProvider;
use crate::moderation::staging::StagedImage;
use crate::network::files::PhotoStore;
use crate::{ANONYMOUS_MARKER, CAPTION_MAX_CHARS};

/// Priced claim offer, answered to a purchase request. The payload comes
/// back verbatim in the payment collaborator's pre-checkout query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceQuote {
    /// Current asking price at quote time.
    pub base_price: u64,
    /// Bid multiplier chosen by the buyer.
    pub multiplier: u32,
    /// Amount to invoice: `base_price * multiplier`.
    pub total: u64,
}

/// What a payment-success event led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// A session is open; the claimant should pick a privacy option and
    /// send a photo. `replaced` is true when an earlier unfinished session
    /// of the same identity was discarded.
    SessionOpened {
        /// An older session for this identity was thrown away.
        replaced: bool,
    },
    /// The identity is blocked; no session was opened.
    AccessDenied,
}

/// What a privacy-choice event led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivacyOutcome {
    /// Choice stored; the claimant should send a photo next.
    Recorded,
    /// No open session for this identity.
    NoSession,
    /// The session is already at the moderation gate; too late to re-choose.
    Busy,
}

/// What a photo submission led to. Exactly one of these comes back per
/// submission; only [`PhotoOutcome::Crowned`] mutates the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoOutcome {
    /// Moderation allowed the photo and the claim was committed. The
    /// session is gone; `post` is what the audience feed should show.
    Crowned {
        /// The freshly committed ledger record.
        record: ThroneRecord,
        /// Best-effort broadcast content for the public feed.
        post: BroadcastPost,
    },
    /// Moderation denied the photo. The session is back at photo
    /// collection with its paid amount and privacy choice intact.
    Rejected {
        /// Collaborator's reason, surfaced verbatim to the submitter.
        reason: String,
    },
    /// Caption over the character limit. Nothing changed; resubmit.
    CaptionTooLong,
    /// The photo bytes could not be fetched from file storage. Nothing
    /// committed; the claimant is re-prompted for a photo.
    PhotoUnavailable,
    /// No open session for this identity.
    NoSession,
    /// A submission from this identity is already being moderated.
    Busy,
}

/// Content of the public-feed post after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastPost {
    /// Photo handle to publish.
    pub photo_ref: String,
    /// Claimant caption.
    pub caption: String,
    /// Handle or anonymity marker.
    pub display: String,
    /// Amount the claimant paid.
    pub paid: u64,
}

/// The submission pipeline. Generic over the moderation provider and the
/// photo file store so tests can script both collaborators.
pub struct SubmissionPipeline<M, F> {
    ledger: Arc<ThroneLedger>,
    blocklist: Blocklist,
    sessions: SessionStore,
    gate: ModerationGate<M>,
    photos: Arc<F>,
}

impl<M: ModerationProvider, F: PhotoStore> SubmissionPipeline<M, F> {
    /// Wires the pipeline over a shared ledger, a moderation gate, and a
    /// photo store. The blocklist rides on the ledger's database.
    pub fn new(ledger: Arc<ThroneLedger>, gate: ModerationGate<M>, photos: Arc<F>) -> Self {
        let blocklist = ledger.blocklist();
        Self {
            ledger,
            blocklist,
            sessions: SessionStore::new(),
            gate,
            photos,
        }
    }

    /// Quotes an invoice for a claim at the current price. Callers have
    /// already validated `multiplier >= 1`.
    pub fn quote(&self, multiplier: u32) -> Result<InvoiceQuote, LedgerError> {
        let base_price = self.ledger.current()?.price;
        Ok(InvoiceQuote {
            base_price,
            multiplier,
            total: pricing::invoice_total(base_price, multiplier),
        })
    }

    /// Consumes a payment-success event. The one and only block check in
    /// the pipeline happens here, before a session opens.
    pub async fn handle_payment(
        &self,
        user_id: UserId,
        paid: u64,
        handle: Option<String>,
    ) -> Result<PaymentOutcome, LedgerError> {
        if self.blocklist.is_blocked(user_id)? {
            info!(user_id, "payment from blocked identity refused");
            return Ok(PaymentOutcome::AccessDenied);
        }

        let replaced = self
            .sessions
            .open(Session::open(user_id, paid, handle))
            .await;
        if let Some(old) = &replaced {
            // Newest payment wins; the earlier paid amount is abandoned.
            warn!(
                user_id,
                abandoned_paid = old.paid,
                open_for_secs = old.opened_at.elapsed().as_secs(),
                "new payment replaced an unfinished session"
            );
        }

        Ok(PaymentOutcome::SessionOpened {
            replaced: replaced.is_some(),
        })
    }

    /// Records the show-handle/stay-anonymous choice. Honored until the
    /// photo reaches the moderation gate, so a re-choice overrides.
    pub async fn handle_privacy(&self, user_id: UserId, show_handle: bool) -> PrivacyOutcome {
        let updated = self
            .sessions
            .update(user_id, |session| {
                if session.stage == SubmissionStage::Moderating {
                    return PrivacyOutcome::Busy;
                }
                session.show_handle = Some(show_handle);
                session.stage = SubmissionStage::AwaitingPhoto;
                PrivacyOutcome::Recorded
            })
            .await;

        updated.unwrap_or(PrivacyOutcome::NoSession)
    }

    /// Consumes a photo submission: validates the caption, fetches and
    /// stages the bytes, runs the moderation gate, and on an allow verdict
    /// commits the claim and destroys the session.
    pub async fn handle_photo(
        &self,
        user_id: UserId,
        photo_ref: &str,
        caption: &str,
    ) -> Result<PhotoOutcome, LedgerError> {
        // Claim the moderation stage in one store operation, before any
        // await. Of two racing submissions, exactly one passes; the other
        // sees the claimed stage and bounces as busy.
        let claimed = self
            .sessions
            .update(user_id, |session| {
                if session.stage == SubmissionStage::Moderating {
                    return None;
                }
                session.stage = SubmissionStage::Moderating;
                Some(session.clone())
            })
            .await;
        let session = match claimed {
            None => return Ok(PhotoOutcome::NoSession),
            Some(None) => return Ok(PhotoOutcome::Busy),
            Some(Some(session)) => session,
        };

        // Local validation next: a long caption never costs a fetch.
        if caption.chars().count() > CAPTION_MAX_CHARS {
            self.reopen_for_photo(user_id).await;
            return Ok(PhotoOutcome::CaptionTooLong);
        }

        let staged = match self.fetch_and_stage(photo_ref).await {
            Some(staged) => staged,
            None => {
                self.reopen_for_photo(user_id).await;
                return Ok(PhotoOutcome::PhotoUnavailable);
            }
        };

        match self.gate.review(&staged).await {
            Verdict::Allow => {
                let record = self.commit(&session, photo_ref, caption)?;
                self.sessions.remove(user_id).await;

                let post = BroadcastPost {
                    photo_ref: record.photo_ref.clone(),
                    caption: record.caption.clone(),
                    display: record.display.clone(),
                    paid: session.paid,
                };
                info!(user_id, price = record.price, id = record.id, "throne claimed");
                Ok(PhotoOutcome::Crowned { record, post })
            }
            Verdict::Deny { reason } => {
                // Paid amount and privacy choice survive for the retry.
                self.reopen_for_photo(user_id).await;
                info!(user_id, reason, "submission rejected by moderation");
                Ok(PhotoOutcome::Rejected { reason })
            }
        }
    }

    /// Releases a claimed moderation stage back to photo collection.
    async fn reopen_for_photo(&self, user_id: UserId) {
        self.sessions
            .update(user_id, |s| s.stage = SubmissionStage::AwaitingPhoto)
            .await;
    }

    async fn fetch_and_stage(&self, photo_ref: &str) -> Option<StagedImage> {
        let bytes = match self.photos.fetch(photo_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(photo_ref, error = %e, "photo fetch failed");
                return None;
            }
        };
        match StagedImage::stage(photo_ref, &bytes) {
            Ok(staged) => Some(staged),
            Err(e) => {
                warn!(photo_ref, error = %e, "photo staging failed");
                None
            }
        }
    }

    /// Appends the claim. The price derives from the session's paid
    /// amount; the append itself serializes against rollbacks through the
    /// ledger's connection lock.
    fn commit(
        &self,
        session: &Session,
        photo_ref: &str,
        caption: &str,
    ) -> Result<ThroneRecord, LedgerError> {
        let display = resolve_display(session);
        self.ledger.append(ThroneClaim {
            user_id: session.user_id,
            price: pricing::next_price(session.paid),
            photo_ref: photo_ref.to_string(),
            caption: caption.to_string(),
            display,
        })
    }

    /// Snapshot of an identity's open session, for the network layer's
    /// prompting and for tests.
    pub async fn session(&self, user_id: UserId) -> Option<Session> {
        self.sessions.get(user_id).await
    }

    /// Shared ledger handle.
    pub fn ledger(&self) -> &Arc<ThroneLedger> {
        &self.ledger
    }

    /// Shared photo store handle.
    pub fn photos(&self) -> &Arc<F> {
        &self.photos
    }
}

/// Handle when the claimant has one and asked for visibility, anonymity
/// marker otherwise. An unanswered privacy prompt defaults to visible,
/// matching the prompt's preselected option.
fn resolve_display(session: &Session) -> String {
    let show = session.show_handle.unwrap_or(true);
    match (&session.handle, show) {
        (Some(handle), true) => format!("@{handle}"),
        _ => ANONYMOUS_MARKER.to_string(),
    }
}
