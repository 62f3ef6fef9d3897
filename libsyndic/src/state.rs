//! Content lifecycle state machine
//!
//! Governs legal transitions of a content item:
//! `Draft -> Generated -> PendingApproval -> {Approved | Rejected}` and
//! `Approved -> Scheduled -> Published`. Rejected and Published are terminal;
//! Scheduled returns to Approved only when every distribution has been
//! cancelled. Illegal transitions fail loudly, never silently no-op.

use crate::error::{Result, SyndicError};
use crate::types::{ContentItem, ContentStatus, DistributionStatus};

/// Review outcome supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject { reason: String },
}

fn allowed(from: ContentStatus, to: ContentStatus) -> bool {
    use ContentStatus::*;
    matches!(
        (from, to),
        (Draft, Generated)
            | (Generated, PendingApproval)
            | (PendingApproval, Approved)
            | (PendingApproval, Rejected)
            | (Approved, Scheduled)
            | (Scheduled, Approved)
            | (Scheduled, Published)
    )
}

/// Check-and-apply a status change on a content item.
///
/// The only mutation path for `ContentItem::status`.
pub fn transition(item: &mut ContentItem, to: ContentStatus) -> Result<()> {
    if !allowed(item.status, to) {
        return Err(SyndicError::StateTransition {
            entity: "content",
            id: item.id.clone(),
            from: item.status.to_string(),
            to: to.to_string(),
        });
    }
    item.status = to;
    item.updated_at = chrono::Utc::now().timestamp();
    Ok(())
}

impl ContentItem {
    /// Record a generated body, moving Draft -> Generated.
    pub fn record_generated(&mut self, body: String) -> Result<()> {
        transition(self, ContentStatus::Generated)?;
        self.body = body;
        Ok(())
    }

    /// Move Generated -> PendingApproval. Requires a non-empty body.
    pub fn submit_for_approval(&mut self) -> Result<()> {
        if self.body.trim().is_empty() {
            return Err(SyndicError::Validation(
                "content body is empty; nothing to approve".to_string(),
            ));
        }
        transition(self, ContentStatus::PendingApproval)
    }

    /// Apply a review decision. Rejection requires a non-empty reason.
    pub fn review(&mut self, decision: ReviewDecision) -> Result<()> {
        match decision {
            ReviewDecision::Approve => transition(self, ContentStatus::Approved),
            ReviewDecision::Reject { reason } => {
                if reason.trim().is_empty() {
                    return Err(SyndicError::Validation(
                        "a rejection reason is required".to_string(),
                    ));
                }
                transition(self, ContentStatus::Rejected)?;
                self.review_note = Some(reason);
                Ok(())
            }
        }
    }

    /// Fires when the first distribution is attached to approved content.
    pub fn mark_scheduled(&mut self) -> Result<()> {
        transition(self, ContentStatus::Scheduled)
    }
}

/// Aggregate content status implied by the statuses of its distributions.
///
/// Returns the status the content should move to, or None to stay put:
/// - any non-terminal distribution: stay Scheduled
/// - any Failed distribution: stay Scheduled (partial failure is surfaced
///   through events, not a status change)
/// - everything published (ignoring cancelled): Published
/// - everything cancelled, or nothing left: back to Approved
pub fn evaluate_aggregate(statuses: &[DistributionStatus]) -> Option<ContentStatus> {
    if statuses.iter().any(|s| !s.is_terminal()) {
        return None;
    }
    if statuses.iter().any(|s| *s == DistributionStatus::Failed) {
        return None;
    }
    if statuses.iter().any(|s| *s == DistributionStatus::Published) {
        return Some(ContentStatus::Published);
    }
    Some(ContentStatus::Approved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_in(status: ContentStatus) -> ContentItem {
        let mut item = ContentItem::new("team-1".into(), "user-1".into(), "Title".into());
        item.status = status;
        item
    }

    #[test]
    fn happy_path_draft_to_published() {
        let mut item = item_in(ContentStatus::Draft);
        item.record_generated("generated body".into()).unwrap();
        assert_eq!(item.status, ContentStatus::Generated);

        item.submit_for_approval().unwrap();
        assert_eq!(item.status, ContentStatus::PendingApproval);

        item.review(ReviewDecision::Approve).unwrap();
        assert_eq!(item.status, ContentStatus::Approved);

        item.mark_scheduled().unwrap();
        assert_eq!(item.status, ContentStatus::Scheduled);

        transition(&mut item, ContentStatus::Published).unwrap();
        assert_eq!(item.status, ContentStatus::Published);
    }

    #[test]
    fn submit_requires_non_empty_body() {
        let mut item = item_in(ContentStatus::Generated);
        item.body = "   ".into();
        let err = item.submit_for_approval().unwrap_err();
        assert!(matches!(err, SyndicError::Validation(_)));
        // Status unchanged on failed guard.
        assert_eq!(item.status, ContentStatus::Generated);
    }

    #[test]
    fn rejection_requires_reason() {
        let mut item = item_in(ContentStatus::PendingApproval);
        let err = item
            .review(ReviewDecision::Reject { reason: "".into() })
            .unwrap_err();
        assert!(matches!(err, SyndicError::Validation(_)));
        assert_eq!(item.status, ContentStatus::PendingApproval);

        item.review(ReviewDecision::Reject {
            reason: "off brand".into(),
        })
        .unwrap();
        assert_eq!(item.status, ContentStatus::Rejected);
        assert_eq!(item.review_note.as_deref(), Some("off brand"));
    }

    #[test]
    fn rejected_is_terminal() {
        let mut item = item_in(ContentStatus::Rejected);
        for target in [
            ContentStatus::Draft,
            ContentStatus::Generated,
            ContentStatus::Approved,
            ContentStatus::Scheduled,
        ] {
            let err = transition(&mut item, target).unwrap_err();
            assert!(matches!(err, SyndicError::StateTransition { .. }));
            assert_eq!(item.status, ContentStatus::Rejected);
        }
    }

    #[test]
    fn scheduled_reverts_only_to_approved() {
        let mut item = item_in(ContentStatus::Scheduled);
        assert!(transition(&mut item, ContentStatus::Draft).is_err());
        assert!(transition(&mut item, ContentStatus::Approved).is_ok());
    }

    #[test]
    fn illegal_transition_reports_states() {
        let mut item = item_in(ContentStatus::Draft);
        let err = transition(&mut item, ContentStatus::Published).unwrap_err();
        let message = format!("{}", err);
        assert!(message.contains("draft"));
        assert!(message.contains("published"));
    }

    #[test]
    fn aggregate_waits_for_all_distributions() {
        use DistributionStatus::*;
        // One still pending: no change.
        assert_eq!(evaluate_aggregate(&[Published, Pending]), None);
        assert_eq!(evaluate_aggregate(&[Published, InFlight]), None);
        // All published: content publishes.
        assert_eq!(
            evaluate_aggregate(&[Published, Published]),
            Some(ContentStatus::Published)
        );
    }

    #[test]
    fn aggregate_partial_failure_keeps_content_scheduled() {
        use DistributionStatus::*;
        assert_eq!(evaluate_aggregate(&[Published, Failed]), None);
        assert_eq!(evaluate_aggregate(&[Failed]), None);
    }

    #[test]
    fn aggregate_all_cancelled_reverts_to_approved() {
        use DistributionStatus::*;
        assert_eq!(
            evaluate_aggregate(&[Cancelled]),
            Some(ContentStatus::Approved)
        );
        assert_eq!(
            evaluate_aggregate(&[Cancelled, Cancelled]),
            Some(ContentStatus::Approved)
        );
        // Cancelled next to published still counts as fully released.
        assert_eq!(
            evaluate_aggregate(&[Cancelled, Published]),
            Some(ContentStatus::Published)
        );
        assert_eq!(evaluate_aggregate(&[]), Some(ContentStatus::Approved));
    }
}
