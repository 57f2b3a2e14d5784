use std::time::Duration;

use attest_core::{Audit, AuditId, AuditStatus, Question, QuestionId, QuestionType, UserId};
use chrono::NaiveDate;
use errors::AccessError;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::postgres::{bounded, db_error};

/// Audits and their questions inside one client database.
#[derive(Clone)]
pub struct AuditStore {
    pool: PgPool,
    query_timeout: Duration,
}

fn decode_err(operation: &str, column: &str, value: &str) -> AccessError {
    AccessError::Database {
        operation: operation.to_string(),
        reason: format!("unrecognized {column} value {value:?}"),
    }
}

pub(crate) fn question_from_row(row: &PgRow) -> Result<Question, AccessError> {
    let err = |e| db_error("load_question", e);
    let question_type: String = row.try_get("question_type").map_err(err)?;
    Ok(Question {
        id: QuestionId::from(row.try_get::<Uuid, _>("id").map_err(err)?),
        audit_id: AuditId::from(row.try_get::<Uuid, _>("audit_id").map_err(err)?),
        prompt: row.try_get("prompt").map_err(err)?,
        question_type: question_type
            .parse()
            .map_err(|_| decode_err("load_question", "question_type", &question_type))?,
        mandatory: row.try_get("mandatory").map_err(err)?,
        position: row.try_get("position").map_err(err)?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<Audit, AccessError> {
    let err = |e| db_error("load_audit", e);
    let status: String = row.try_get("status").map_err(err)?;
    Ok(Audit {
        id: AuditId::from(row.try_get::<Uuid, _>("id").map_err(err)?),
        framework: row.try_get("framework").map_err(err)?,
        assignee: row
            .try_get::<Option<Uuid>, _>("assignee")
            .map_err(err)?
            .map(UserId::from),
        due_date: row.try_get("due_date").map_err(err)?,
        status: status
            .parse()
            .map_err(|_| decode_err("load_audit", "status", &status))?,
    })
}

impl AuditStore {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    pub async fn create_audit(
        &self,
        framework: &str,
        assignee: Option<UserId>,
        due_date: Option<NaiveDate>,
    ) -> Result<Audit, AccessError> {
        let audit = Audit {
            id: AuditId::generate(),
            framework: framework.to_string(),
            assignee,
            due_date,
            status: AuditStatus::NotStarted,
        };
        let fut = async {
            sqlx::query(
                "INSERT INTO audits (id, framework, assignee, due_date, status)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(audit.id.as_uuid())
            .bind(&audit.framework)
            .bind(assignee.map(|u| u.as_uuid()))
            .bind(due_date)
            .bind(audit.status.as_ref())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("create_audit", e))
        };
        bounded("create_audit", self.query_timeout, fut).await?;
        tracing::info!(audit_id = %audit.id, framework, "Created audit");
        Ok(audit)
    }

    pub async fn get_audit(&self, audit_id: AuditId) -> Result<Audit, AccessError> {
        let fut = async {
            let row = sqlx::query(
                "SELECT id, framework, assignee, due_date, status FROM audits WHERE id = $1",
            )
            .bind(audit_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get_audit", e))?
            .ok_or_else(|| AccessError::not_found("audit", audit_id))?;
            audit_from_row(&row)
        };
        bounded("get_audit", self.query_timeout, fut).await
    }

    pub async fn set_status(&self, audit_id: AuditId, status: AuditStatus) -> Result<(), AccessError> {
        let fut = async {
            sqlx::query("UPDATE audits SET status = $2 WHERE id = $1")
                .bind(audit_id.as_uuid())
                .bind(status.as_ref())
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("set_audit_status", e))
        };
        let result = bounded("set_audit_status", self.query_timeout, fut).await?;
        if result.rows_affected() == 0 {
            return Err(AccessError::not_found("audit", audit_id));
        }
        Ok(())
    }

    /// Appends a question at the end of the audit.
    pub async fn add_question(
        &self,
        audit_id: AuditId,
        prompt: &str,
        question_type: QuestionType,
        mandatory: bool,
    ) -> Result<Question, AccessError> {
        let fut = async {
            let row = sqlx::query(
                "INSERT INTO questions (id, audit_id, prompt, question_type, mandatory, position)
                 SELECT $1, $2, $3, $4, $5, COALESCE(MAX(position), 0) + 1
                 FROM questions WHERE audit_id = $2
                 RETURNING id, audit_id, prompt, question_type, mandatory, position",
            )
            .bind(Uuid::new_v4())
            .bind(audit_id.as_uuid())
            .bind(prompt)
            .bind(question_type.as_ref())
            .bind(mandatory)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    AccessError::not_found("audit", audit_id)
                }
                other => db_error("add_question", other),
            })?;
            question_from_row(&row)
        };
        bounded("add_question", self.query_timeout, fut).await
    }

    pub async fn get_question(&self, question_id: QuestionId) -> Result<Option<Question>, AccessError> {
        let fut = async {
            let row = sqlx::query(
                "SELECT id, audit_id, prompt, question_type, mandatory, position
                 FROM questions WHERE id = $1",
            )
            .bind(question_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get_question", e))?;
            row.as_ref().map(question_from_row).transpose()
        };
        bounded("get_question", self.query_timeout, fut).await
    }

    /// All questions of an audit in display order, ignoring visibility.
    pub async fn list_questions(&self, audit_id: AuditId) -> Result<Vec<Question>, AccessError> {
        let fut = async {
            let rows = sqlx::query(
                "SELECT id, audit_id, prompt, question_type, mandatory, position
                 FROM questions WHERE audit_id = $1 ORDER BY position",
            )
            .bind(audit_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_questions", e))?;
            rows.iter().map(question_from_row).collect()
        };
        bounded("list_questions", self.query_timeout, fut).await
    }
}
