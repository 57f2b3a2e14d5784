//! Question visibility, delegation and the persisted submission workflow for
//! one client database.
//!
//! Every transition runs in a single transaction: the current row is locked
//! with `SELECT ... FOR UPDATE`, the [`SubmissionWorkflow`] decides the next
//! record, and the write is guarded on the version that was read. Two
//! writers racing on the same question therefore serialize; a writer that
//! still loses (two first drafts at once) gets [`AccessError::Conflict`]
//! and may retry.

use std::time::Duration;

use attest_core::{
    AuditId, Question, QuestionAssignment, QuestionId, ReviewAction, Submission, SubmissionId,
    UserId,
};
use chrono::Utc;
use errors::AccessError;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::audits::question_from_row;
use crate::client_authz::ClientAuthorizer;
use crate::postgres::{bounded, db_error};
use crate::submission_workflow::{SubmissionEvent, SubmissionWorkflow};

#[derive(Clone)]
pub struct SubmissionEngine {
    pool: PgPool,
    authz: ClientAuthorizer,
    query_timeout: Duration,
}

fn submission_from_row(row: &PgRow) -> Result<Submission, AccessError> {
    let err = |e| db_error("load_submission", e);
    let status: String = row.try_get("status").map_err(err)?;
    Ok(Submission {
        id: SubmissionId::from(row.try_get::<Uuid, _>("id").map_err(err)?),
        question_id: QuestionId::from(row.try_get::<Uuid, _>("question_id").map_err(err)?),
        answer: row.try_get("answer").map_err(err)?,
        submitted_by: UserId::from(row.try_get::<Uuid, _>("submitted_by").map_err(err)?),
        status: status.parse().map_err(|_| AccessError::Database {
            operation: "load_submission".to_string(),
            reason: format!("unrecognized status {status:?}"),
        })?,
        reviewer: row
            .try_get::<Option<Uuid>, _>("reviewer")
            .map_err(err)?
            .map(UserId::from),
        review_notes: row.try_get("review_notes").map_err(err)?,
        version: row.try_get("version").map_err(err)?,
        created_at: row.try_get("created_at").map_err(err)?,
        updated_at: row.try_get("updated_at").map_err(err)?,
    })
}

fn assignment_from_row(row: &PgRow) -> Result<QuestionAssignment, AccessError> {
    let err = |e| db_error("question_assignments", e);
    Ok(QuestionAssignment {
        question_id: QuestionId::from(row.try_get::<Uuid, _>("question_id").map_err(err)?),
        user_id: UserId::from(row.try_get::<Uuid, _>("user_id").map_err(err)?),
        assigned_by: row
            .try_get::<Option<Uuid>, _>("assigned_by")
            .map_err(err)?
            .map(UserId::from),
        assigned_at: row.try_get("assigned_at").map_err(err)?,
    })
}

impl SubmissionEngine {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            authz: ClientAuthorizer::new(pool.clone(), query_timeout),
            pool,
            query_timeout,
        }
    }

    async fn question_exists(&self, question_id: QuestionId) -> Result<bool, AccessError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM questions WHERE id = $1) AS found")
            .bind(question_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("question_exists", e))?;
        row.try_get("found").map_err(|e| db_error("question_exists", e))
    }

    async fn is_assigned(&self, user_id: UserId, question_id: QuestionId) -> Result<bool, AccessError> {
        let row = sqlx::query(
            "SELECT EXISTS (
                 SELECT 1 FROM question_assignments WHERE question_id = $1 AND user_id = $2
             ) AS assigned",
        )
        .bind(question_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("question_assigned", e))?;
        row.try_get("assigned").map_err(|e| db_error("question_assigned", e))
    }

    /// Whether `user_id` may see `question_id`: true for point-of-contact
    /// equivalents, otherwise only with an explicit assignment.
    pub async fn is_question_visible(
        &self,
        user_id: UserId,
        question_id: QuestionId,
    ) -> Result<bool, AccessError> {
        let fut = async {
            if !self.question_exists(question_id).await? {
                return Err(AccessError::not_found("question", question_id));
            }
            if self.authz.sees_all_questions(user_id).await? {
                return Ok(true);
            }
            self.is_assigned(user_id, question_id).await
        };
        bounded("is_question_visible", self.query_timeout, fut).await
    }

    async fn ensure_visible(&self, user_id: UserId, question_id: QuestionId) -> Result<(), AccessError> {
        if self.is_question_visible(user_id, question_id).await? {
            Ok(())
        } else {
            tracing::debug!(user_id = %user_id, question_id = %question_id, "Question not visible");
            Err(AccessError::PermissionDenied)
        }
    }

    /// Questions of `audit_id` the user may see, in display order.
    pub async fn visible_questions(
        &self,
        user_id: UserId,
        audit_id: AuditId,
    ) -> Result<Vec<Question>, AccessError> {
        let sees_all = self.authz.sees_all_questions(user_id).await?;
        let fut = async {
            let rows = sqlx::query(
                "SELECT q.id, q.audit_id, q.prompt, q.question_type, q.mandatory, q.position
                 FROM questions q
                 WHERE q.audit_id = $1
                   AND ($3 OR EXISTS (
                       SELECT 1 FROM question_assignments qa
                       WHERE qa.question_id = q.id AND qa.user_id = $2
                   ))
                 ORDER BY q.position",
            )
            .bind(audit_id.as_uuid())
            .bind(user_id.as_uuid())
            .bind(sees_all)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("visible_questions", e))?;
            rows.iter().map(question_from_row).collect()
        };
        bounded("visible_questions", self.query_timeout, fut).await
    }

    /// Delegates a question to `assignee`. Re-assigning is a no-op.
    pub async fn assign_question(
        &self,
        question_id: QuestionId,
        assignee: UserId,
        assigned_by: UserId,
    ) -> Result<(), AccessError> {
        let fut = async {
            sqlx::query(
                "INSERT INTO question_assignments (question_id, user_id, assigned_by)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (question_id, user_id) DO NOTHING",
            )
            .bind(question_id.as_uuid())
            .bind(assignee.as_uuid())
            .bind(assigned_by.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    AccessError::not_found("question", question_id)
                }
                other => db_error("assign_question", other),
            })
        };
        bounded("assign_question", self.query_timeout, fut).await?;
        tracing::info!(
            question_id = %question_id,
            assignee = %assignee,
            assigned_by = %assigned_by,
            "Assigned question"
        );
        Ok(())
    }

    pub async fn unassign_question(
        &self,
        question_id: QuestionId,
        assignee: UserId,
    ) -> Result<bool, AccessError> {
        let fut = async {
            sqlx::query("DELETE FROM question_assignments WHERE question_id = $1 AND user_id = $2")
                .bind(question_id.as_uuid())
                .bind(assignee.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("unassign_question", e))
        };
        let result = bounded("unassign_question", self.query_timeout, fut).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Who a question is delegated to, oldest assignment first.
    pub async fn assignments(
        &self,
        question_id: QuestionId,
    ) -> Result<Vec<QuestionAssignment>, AccessError> {
        let fut = async {
            let rows = sqlx::query(
                "SELECT question_id, user_id, assigned_by, assigned_at
                 FROM question_assignments
                 WHERE question_id = $1
                 ORDER BY assigned_at, user_id",
            )
            .bind(question_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("question_assignments", e))?;
            rows.iter().map(assignment_from_row).collect()
        };
        bounded("question_assignments", self.query_timeout, fut).await
    }

    /// The stored submission for a question the user can see.
    pub async fn submission_for(
        &self,
        user_id: UserId,
        question_id: QuestionId,
    ) -> Result<Option<Submission>, AccessError> {
        self.ensure_visible(user_id, question_id).await?;
        let fut = async {
            let row = sqlx::query(
                "SELECT id, question_id, answer, submitted_by, status, reviewer, review_notes,
                        version, created_at, updated_at
                 FROM submissions WHERE question_id = $1",
            )
            .bind(question_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("submission_for", e))?;
            row.as_ref().map(submission_from_row).transpose()
        };
        bounded("submission_for", self.query_timeout, fut).await
    }

    pub async fn save_draft(
        &self,
        author: UserId,
        question_id: QuestionId,
        answer: Value,
    ) -> Result<Submission, AccessError> {
        self.ensure_visible(author, question_id).await?;
        self.transition(
            question_id,
            author,
            SubmissionEvent::SaveDraft {
                author,
                answer,
                saved_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn submit_for_review(
        &self,
        user_id: UserId,
        question_id: QuestionId,
    ) -> Result<Submission, AccessError> {
        self.ensure_visible(user_id, question_id).await?;
        self.transition(
            question_id,
            user_id,
            SubmissionEvent::Submit {
                submitted_by: user_id,
                submitted_at: Utc::now(),
            },
        )
        .await
    }

    /// Records a reviewer decision. The caller is responsible for checking
    /// that `reviewer` holds the review permission.
    pub async fn review(
        &self,
        reviewer: UserId,
        question_id: QuestionId,
        action: ReviewAction,
        notes: Option<String>,
    ) -> Result<Submission, AccessError> {
        let event = SubmissionEvent::Review {
            reviewer,
            action,
            notes,
            reviewed_at: Utc::now(),
        };
        event.check_preconditions()?;
        if !self.question_exists(question_id).await? {
            return Err(AccessError::not_found("question", question_id));
        }
        self.transition(question_id, reviewer, event).await
    }

    async fn transition(
        &self,
        question_id: QuestionId,
        actor: UserId,
        event: SubmissionEvent,
    ) -> Result<Submission, AccessError> {
        event.check_preconditions()?;
        let action = event.name();

        let fut = async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("submission_transition", e))?;

            let row = sqlx::query(
                "SELECT id, question_id, answer, submitted_by, status, reviewer, review_notes,
                        version, created_at, updated_at
                 FROM submissions WHERE question_id = $1
                 FOR UPDATE",
            )
            .bind(question_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("submission_transition", e))?;

            let current = row.as_ref().map(submission_from_row).transpose()?;
            let read_version = current.as_ref().map(|s| s.version);
            let mut workflow = match current {
                Some(existing) => SubmissionWorkflow::resume(existing),
                None => SubmissionWorkflow::start(question_id, actor, Utc::now()),
            };
            workflow.handle(event)?;
            let next = workflow.into_record();

            let written = match read_version {
                Some(version) => sqlx::query(
                    "UPDATE submissions SET
                         answer = $2, submitted_by = $3, status = $4, reviewer = $5,
                         review_notes = $6, version = $7, updated_at = $8
                     WHERE id = $1 AND version = $9",
                )
                .bind(next.id.as_uuid())
                .bind(&next.answer)
                .bind(next.submitted_by.as_uuid())
                .bind(next.status.as_ref())
                .bind(next.reviewer.map(|r| r.as_uuid()))
                .bind(next.review_notes.as_deref())
                .bind(next.version)
                .bind(next.updated_at)
                .bind(version)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("submission_transition", e))?,
                None => sqlx::query(
                    "INSERT INTO submissions
                         (id, question_id, answer, submitted_by, status, reviewer,
                          review_notes, version, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                     ON CONFLICT (question_id) DO NOTHING",
                )
                .bind(next.id.as_uuid())
                .bind(next.question_id.as_uuid())
                .bind(&next.answer)
                .bind(next.submitted_by.as_uuid())
                .bind(next.status.as_ref())
                .bind(next.reviewer.map(|r| r.as_uuid()))
                .bind(next.review_notes.as_deref())
                .bind(next.version)
                .bind(next.created_at)
                .bind(next.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("submission_transition", e))?,
            };

            if written.rows_affected() == 0 {
                return Err(AccessError::Conflict {
                    resource: "submission".to_string(),
                    id: question_id.to_string(),
                });
            }

            tx.commit()
                .await
                .map_err(|e| db_error("submission_transition", e))?;
            Ok(next)
        };

        let record = bounded("submission_transition", self.query_timeout, fut).await?;
        tracing::info!(
            question_id = %question_id,
            action = %action,
            status = %record.status,
            version = record.version,
            "Submission updated"
        );
        Ok(record)
    }
}
