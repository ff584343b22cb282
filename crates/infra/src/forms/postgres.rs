//! Postgres-backed form repository (`agent_forms` table).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use agentform_core::{AgentForm, DomainError, FormId, NewAgentForm};

use super::repository::{FormActivity, FormCounts, FormRepository, FormStoreError, ProcessingTimes};

#[derive(Debug, Clone)]
pub struct PostgresFormRepository {
    pool: Arc<PgPool>,
}

impl PostgresFormRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[derive(Debug, FromRow)]
struct FormRow {
    id: i64,
    name: String,
    email: String,
    secret: String,
    email_verified_at: Option<DateTime<Utc>>,
    email_sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<FormRow> for AgentForm {
    type Error = FormStoreError;

    fn try_from(row: FormRow) -> Result<Self, Self::Error> {
        let form = AgentForm {
            id: FormId::new(row.id),
            name: row.name,
            email: row.email,
            secret: row.secret,
            email_verified_at: row.email_verified_at,
            email_sent_at: row.email_sent_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };
        form.check_invariants()?;
        Ok(form)
    }
}

const FORM_COLUMNS: &str =
    "id, name, email, secret, email_verified_at, email_sent_at, created_at, updated_at";

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> FormStoreError {
    FormStoreError::Storage(format!("{operation}: {e}"))
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl PostgresFormRepository {
    async fn resolve_guarded_update(
        &self,
        operation: &str,
        id: FormId,
        row: Option<FormRow>,
    ) -> Result<AgentForm, FormStoreError> {
        match row {
            Some(row) => AgentForm::try_from(row),
            None => match self.get(id).await? {
                Some(_) => Err(FormStoreError::Domain(DomainError::invariant(format!(
                    "{operation}: form {id} is not verified"
                )))),
                None => Err(FormStoreError::NotFound(id)),
            },
        }
    }
}

#[async_trait]
impl FormRepository for PostgresFormRepository {
    #[instrument(skip(self, new), fields(email = %new.email), err)]
    async fn create(&self, new: NewAgentForm) -> Result<AgentForm, FormStoreError> {
        let result: Result<FormRow, sqlx::Error> = sqlx::query_as(&format!(
            r#"
            INSERT INTO agent_forms (name, email, secret, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING {FORM_COLUMNS}
            "#
        ))
        .bind(&new.name)
        .bind(new.email.as_str())
        .bind(&new.secret)
        .fetch_one(&*self.pool)
        .await;

        match result {
            Ok(row) => AgentForm::try_from(row),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505") => {
                Err(FormStoreError::Conflict(new.email.into_string()))
            }
            Err(e) => Err(map_sqlx_error("create", e)),
        }
    }

    async fn get(&self, id: FormId) -> Result<Option<AgentForm>, FormStoreError> {
        let row: Option<FormRow> =
            sqlx::query_as(&format!("SELECT {FORM_COLUMNS} FROM agent_forms WHERE id = $1"))
                .bind(id.get())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("get", e))?;

        row.map(AgentForm::try_from).transpose()
    }

    async fn mark_verified(
        &self,
        id: FormId,
        at: DateTime<Utc>,
    ) -> Result<AgentForm, FormStoreError> {
        let row: Option<FormRow> = sqlx::query_as(&format!(
            r#"
            UPDATE agent_forms
            SET updated_at = CASE WHEN email_verified_at IS NULL THEN $2 ELSE updated_at END,
                email_verified_at = COALESCE(email_verified_at, $2)
            WHERE id = $1
            RETURNING {FORM_COLUMNS}
            "#
        ))
        .bind(id.get())
        .bind(at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_verified", e))?;

        row.map(AgentForm::try_from)
            .transpose()?
            .ok_or(FormStoreError::NotFound(id))
    }

    async fn mark_email_sent(
        &self,
        id: FormId,
        at: DateTime<Utc>,
    ) -> Result<AgentForm, FormStoreError> {
        // The verification guard lives in the WHERE clause so the check and
        // the write are one statement.
        let row: Option<FormRow> = sqlx::query_as(&format!(
            r#"
            UPDATE agent_forms
            SET email_sent_at = $2, updated_at = $2
            WHERE id = $1 AND email_verified_at IS NOT NULL
            RETURNING {FORM_COLUMNS}
            "#
        ))
        .bind(id.get())
        .bind(at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_email_sent", e))?;

        self.resolve_guarded_update("mark_email_sent", id, row).await
    }

    async fn reset_processing(
        &self,
        id: FormId,
        at: DateTime<Utc>,
    ) -> Result<AgentForm, FormStoreError> {
        let row: Option<FormRow> = sqlx::query_as(&format!(
            r#"
            UPDATE agent_forms
            SET email_verified_at = NULL, email_sent_at = NULL, updated_at = $2
            WHERE id = $1
            RETURNING {FORM_COLUMNS}
            "#
        ))
        .bind(id.get())
        .bind(at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_processing", e))?;

        row.map(AgentForm::try_from)
            .transpose()?
            .ok_or(FormStoreError::NotFound(id))
    }

    async fn needing_verification(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AgentForm>, FormStoreError> {
        let rows: Vec<FormRow> = sqlx::query_as(&format!(
            r#"
            SELECT {FORM_COLUMNS} FROM agent_forms
            WHERE email_verified_at IS NULL AND created_at <= $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(created_before)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("needing_verification", e))?;

        rows.into_iter().map(AgentForm::try_from).collect()
    }

    async fn needing_email(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AgentForm>, FormStoreError> {
        let rows: Vec<FormRow> = sqlx::query_as(&format!(
            r#"
            SELECT {FORM_COLUMNS} FROM agent_forms
            WHERE email_verified_at IS NOT NULL
              AND email_sent_at IS NULL
              AND created_at <= $1
            ORDER BY email_verified_at ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(created_before)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("needing_email", e))?;

        rows.into_iter().map(AgentForm::try_from).collect()
    }

    async fn counts(
        &self,
        created_since: Option<DateTime<Utc>>,
    ) -> Result<FormCounts, FormStoreError> {
        let (total, verified, email_sent, completed): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE email_verified_at IS NOT NULL),
                COUNT(*) FILTER (WHERE email_sent_at IS NOT NULL),
                COUNT(*) FILTER (WHERE email_verified_at IS NOT NULL AND email_sent_at IS NOT NULL)
            FROM agent_forms
            WHERE $1::timestamptz IS NULL OR created_at >= $1
            "#,
        )
        .bind(created_since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("counts", e))?;

        Ok(FormCounts {
            total: count(total),
            verified: count(verified),
            email_sent: count(email_sent),
            completed: count(completed),
        })
    }

    async fn activity_since(&self, since: DateTime<Utc>) -> Result<FormActivity, FormStoreError> {
        let (verified, emails_sent): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE email_verified_at >= $1),
                COUNT(*) FILTER (WHERE email_verified_at IS NOT NULL AND email_sent_at >= $1)
            FROM agent_forms
            "#,
        )
        .bind(since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("activity_since", e))?;

        Ok(FormActivity {
            verified: count(verified),
            emails_sent: count(emails_sent),
        })
    }

    async fn processing_times(
        &self,
        created_since: DateTime<Utc>,
    ) -> Result<ProcessingTimes, FormStoreError> {
        let (verification, email, total): (Option<f64>, Option<f64>, Option<f64>) =
            sqlx::query_as(
                r#"
                SELECT
                    AVG(EXTRACT(EPOCH FROM (email_verified_at - created_at)))::float8,
                    AVG(EXTRACT(EPOCH FROM (email_sent_at - email_verified_at)))::float8,
                    (AVG(EXTRACT(EPOCH FROM (email_sent_at - created_at)))
                        FILTER (WHERE email_verified_at IS NOT NULL))::float8
                FROM agent_forms
                WHERE created_at >= $1
                "#,
            )
            .bind(created_since)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("processing_times", e))?;

        Ok(ProcessingTimes {
            avg_verification_secs: verification.unwrap_or(0.0),
            avg_email_secs: email.unwrap_or(0.0),
            avg_total_secs: total.unwrap_or(0.0),
        })
    }
}
