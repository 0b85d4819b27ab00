// # Permission-intent correlator
//
// Some store mutations only complete after the OS walks the user through a
// consent prompt. The correlator issues no prompts itself; it owns the
// single pending-result slot between "consent requested" and "external
// callback arrived" and resumes exactly the stored reply handle.

use crate::dispatcher::Replier;
use crate::error::BridgeError;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

/// Which workflow a consent answer resumes. The correlator is agnostic to
/// what the consent was for beyond this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentKind {
    Favorite,
    BulkDeletion,
}

/// One OS-level consent request covering a batch of songs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentRequest {
    Favorite { song_ids: Vec<i64>, value: bool },
    BulkDeletion { song_ids: Vec<i64> },
}

impl ConsentRequest {
    pub fn kind(&self) -> ConsentKind {
        match self {
            ConsentRequest::Favorite { .. } => ConsentKind::Favorite,
            ConsentRequest::BulkDeletion { .. } => ConsentKind::BulkDeletion,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsentError {
    /// The request could not be handed to the OS at all.
    #[error("consent request could not be dispatched: {0}")]
    Dispatch(String),
    #[error("{0}")]
    Other(String),
}

impl From<ConsentError> for BridgeError {
    fn from(error: ConsentError) -> Self {
        match error {
            ConsentError::Dispatch(message) => BridgeError::Consent(message),
            ConsentError::Other(message) => BridgeError::Unexpected(message),
        }
    }
}

/// Hands a consent request to the OS surface that can present it. The
/// answer arrives later through the external correlation callback, not
/// through this trait.
#[async_trait]
pub trait ConsentRequester: Send + Sync {
    async fn issue(&self, request: ConsentRequest) -> Result<(), ConsentError>;
}

struct PendingConsent {
    kind: ConsentKind,
    replier: Replier,
}

/// At most one consent request is in flight per dispatcher. A second
/// gated operation is rejected with a consent failure while one is
/// pending; the stored continuation is never dropped or overwritten.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<Option<PendingConsent>>,
}

impl Correlator {
    pub fn new() -> Self {
        Correlator::default()
    }

    /// Claims the pending slot for `replier`. Returns false when a request
    /// is already awaiting consent, in which case `replier` has been
    /// failed and the stored continuation is untouched.
    pub async fn begin(&self, kind: ConsentKind, replier: Replier) -> bool {
        let mut pending = self.pending.lock().await;
        if pending.is_some() {
            drop(pending);
            warn!(?kind, "rejecting consent request while another is pending");
            replier.fail(BridgeError::Consent(
                "another consent request is already awaiting the user".into(),
            ));
            return false;
        }
        *pending = Some(PendingConsent { kind, replier });
        true
    }

    /// External correlation callback: the user accepted or rejected the
    /// prompt for `kind`. Delivers success(bool) to the stored handle and
    /// returns whether anything was resumed.
    pub async fn resolve(&self, kind: ConsentKind, accepted: bool) -> bool {
        let mut pending = self.pending.lock().await;
        let stored_kind = pending.as_ref().map(|stored| stored.kind);
        match stored_kind {
            Some(stored_kind) if stored_kind == kind => {
                let stored = pending.take().expect("pending slot checked above");
                drop(pending);
                stored.replier.succeed(Value::Bool(accepted));
                true
            }
            Some(stored_kind) => {
                warn!(
                    pending = ?stored_kind,
                    received = ?kind,
                    "ignoring consent answer for a different request kind"
                );
                false
            }
            None => {
                warn!(?kind, "ignoring consent answer with nothing pending");
                false
            }
        }
    }

    /// Issuance failed after the slot was claimed: fail the stored handle
    /// and return to idle.
    pub async fn fail_pending(&self, error: BridgeError) {
        let stored = self.pending.lock().await.take();
        if let Some(stored) = stored {
            stored.replier.fail(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Outcome;
    use crate::test_support::replier_pair;

    #[tokio::test]
    async fn resolve_delivers_the_users_answer_once() {
        let correlator = Correlator::new();
        let (replier, mut completions) = replier_pair(1);
        assert!(correlator.begin(ConsentKind::Favorite, replier).await);
        assert!(correlator.resolve(ConsentKind::Favorite, true).await);

        let completion = completions.recv().await.unwrap();
        assert_eq!(completion.call, 1);
        assert!(matches!(completion.outcome, Outcome::Success(Value::Bool(true))));

        // Slot is idle again; nothing further arrives.
        assert!(!correlator.resolve(ConsentKind::Favorite, true).await);
        assert!(completions.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_request_is_rejected_and_first_still_resolves() {
        let correlator = Correlator::new();
        let (first, mut first_completions) = replier_pair(1);
        let (second, mut second_completions) = replier_pair(2);

        assert!(correlator.begin(ConsentKind::BulkDeletion, first).await);
        assert!(!correlator.begin(ConsentKind::Favorite, second).await);

        let rejected = second_completions.recv().await.unwrap();
        match rejected.outcome {
            Outcome::Failure(failure) => assert_eq!(failure.code, "PLATFORM_CONSENT_ERROR"),
            other => panic!("expected failure, got {other:?}"),
        }

        assert!(correlator.resolve(ConsentKind::BulkDeletion, false).await);
        let completion = first_completions.recv().await.unwrap();
        assert!(matches!(completion.outcome, Outcome::Success(Value::Bool(false))));
    }

    #[tokio::test]
    async fn mismatched_kind_leaves_the_slot_pending() {
        let correlator = Correlator::new();
        let (replier, mut completions) = replier_pair(1);
        assert!(correlator.begin(ConsentKind::Favorite, replier).await);

        assert!(!correlator.resolve(ConsentKind::BulkDeletion, true).await);
        assert!(completions.try_recv().is_err());

        assert!(correlator.resolve(ConsentKind::Favorite, true).await);
        assert!(completions.recv().await.is_some());
    }

    #[tokio::test]
    async fn fail_pending_converts_issuance_errors() {
        let correlator = Correlator::new();
        let (replier, mut completions) = replier_pair(1);
        assert!(correlator.begin(ConsentKind::Favorite, replier).await);
        correlator
            .fail_pending(ConsentError::Dispatch("surface detached".into()).into())
            .await;

        let completion = completions.recv().await.unwrap();
        match completion.outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.code, "PLATFORM_CONSENT_ERROR");
                assert!(failure.message.contains("surface detached"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
