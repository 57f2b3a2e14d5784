use attest_core::{QuestionId, ReviewAction, Submission, SubmissionId, SubmissionStatus, UserId};
use chrono::{DateTime, Utc};
use errors::AccessError;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum SubmissionEvent {
    SaveDraft {
        author: UserId,
        answer: Value,
        saved_at: DateTime<Utc>,
    },
    Submit {
        submitted_by: UserId,
        submitted_at: DateTime<Utc>,
    },
    Review {
        reviewer: UserId,
        action: ReviewAction,
        notes: Option<String>,
        reviewed_at: DateTime<Utc>,
    },
}

impl SubmissionEvent {
    pub fn name(&self) -> String {
        match self {
            SubmissionEvent::SaveDraft { .. } => "save_draft".to_string(),
            SubmissionEvent::Submit { .. } => "submit_for_review".to_string(),
            SubmissionEvent::Review { action, .. } => action.to_string(),
        }
    }

    /// Checks that depend only on the event itself. Rejections and referrals
    /// must carry non-blank notes.
    pub fn check_preconditions(&self) -> Result<(), AccessError> {
        if let SubmissionEvent::Review { action, notes, .. } = self {
            let blank = notes.as_deref().is_none_or(|n| n.trim().is_empty());
            match action {
                ReviewAction::Reject if blank => {
                    return Err(AccessError::precondition(
                        "review_notes",
                        "a rejection requires a reason",
                    ));
                }
                ReviewAction::Refer if blank => {
                    return Err(AccessError::precondition(
                        "review_notes",
                        "a referral requires notes",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// State machine over one question's submission record.
///
/// ```text
/// not_started ─save─▶ in_progress ─submit─▶ submitted ─approve─▶ approved
///                        ▲   ▲                 │ reject / refer
///                        └───┴──── save ───────┘
/// ```
///
/// Every accepted event bumps `version` by exactly one.
#[derive(Debug, Clone)]
pub struct SubmissionWorkflow {
    record: Submission,
}

impl SubmissionWorkflow {
    /// A workflow for a question that has no stored submission yet.
    pub fn start(question_id: QuestionId, author: UserId, now: DateTime<Utc>) -> Self {
        Self {
            record: Submission {
                id: SubmissionId::generate(),
                question_id,
                answer: Value::Null,
                submitted_by: author,
                status: SubmissionStatus::NotStarted,
                reviewer: None,
                review_notes: None,
                version: 0,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn resume(record: Submission) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &Submission {
        &self.record
    }

    pub fn into_record(self) -> Submission {
        self.record
    }

    pub fn status(&self) -> SubmissionStatus {
        self.record.status
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.record.version += 1;
        self.record.updated_at = at;
    }

    pub fn handle(&mut self, event: SubmissionEvent) -> Result<(), AccessError> {
        event.check_preconditions()?;

        match (self.record.status, event) {
            (
                SubmissionStatus::NotStarted
                | SubmissionStatus::InProgress
                | SubmissionStatus::Rejected
                | SubmissionStatus::Referred,
                SubmissionEvent::SaveDraft {
                    author,
                    answer,
                    saved_at,
                },
            ) => {
                self.record.answer = answer;
                self.record.submitted_by = author;
                self.record.status = SubmissionStatus::InProgress;
                self.touch(saved_at);
                tracing::debug!(question_id = %self.record.question_id, "Draft saved");
                Ok(())
            }

            (
                SubmissionStatus::InProgress,
                SubmissionEvent::Submit {
                    submitted_by,
                    submitted_at,
                },
            ) => {
                if self.record.answer.is_null() {
                    return Err(AccessError::precondition(
                        "answer",
                        "cannot submit an empty answer",
                    ));
                }
                self.record.submitted_by = submitted_by;
                self.record.status = SubmissionStatus::Submitted;
                self.touch(submitted_at);
                tracing::info!(question_id = %self.record.question_id, "Submission sent for review");
                Ok(())
            }

            (
                SubmissionStatus::Submitted,
                SubmissionEvent::Review {
                    reviewer,
                    action,
                    notes,
                    reviewed_at,
                },
            ) => {
                self.record.status = match action {
                    ReviewAction::Approve => SubmissionStatus::Approved,
                    ReviewAction::Reject => SubmissionStatus::Rejected,
                    ReviewAction::Refer => SubmissionStatus::Referred,
                };
                self.record.reviewer = Some(reviewer);
                self.record.review_notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
                self.touch(reviewed_at);
                tracing::info!(
                    question_id = %self.record.question_id,
                    outcome = %self.record.status,
                    "Submission reviewed"
                );
                Ok(())
            }

            (status, event) => Err(AccessError::InvalidTransition {
                from: status.to_string(),
                action: event.name(),
            }),
        }
    }
}
