//! PostgreSQL implementation of [`RemoteDatabase`].
//!
//! Rows are read into typed row structs and converted to domain types;
//! unknown enum strings surface as [`VowError::Schema`].

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::remote::RemoteDatabase;
use crate::error::VowError;
use crate::models::{
    ChatMessage, Commitment, CommitmentMode, CommitmentStatus, PomodoroSession, Profile, Role,
    Task, ValidatorAssignment, ValidatorDecision,
};

#[derive(Debug, Clone)]
pub struct PgRemote {
    pool: PgPool,
}

impl PgRemote {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct CommitmentRow {
    id: Uuid,
    owner_id: Uuid,
    owner_name: String,
    title: String,
    description: Option<String>,
    mode: String,
    stake_cents: i64,
    duration_days: i32,
    start_date: NaiveDate,
    end_date: NaiveDate,
    fund_destination: Option<String>,
    status: String,
    owner_marked_complete: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ValidatorRow {
    commitment_id: Uuid,
    validator_id: Uuid,
    display_name: String,
    decision: String,
}

#[derive(Debug, sqlx::FromRow)]
struct CheckinRow {
    commitment_id: Uuid,
    day: NaiveDate,
}

#[derive(Debug, sqlx::FromRow)]
struct ChatMessageRow {
    id: Uuid,
    user_id: Uuid,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

fn schema_error(column: &str, value: &str) -> VowError {
    VowError::Schema(format!("unexpected {} value '{}'", column, value))
}

impl TryFrom<ValidatorRow> for ValidatorAssignment {
    type Error = VowError;

    fn try_from(row: ValidatorRow) -> Result<Self, Self::Error> {
        Ok(Self {
            validator_id: row.validator_id,
            display_name: row.display_name,
            decision: ValidatorDecision::parse(&row.decision)
                .ok_or_else(|| schema_error("decision", &row.decision))?,
        })
    }
}

impl TryFrom<ChatMessageRow> for ChatMessage {
    type Error = VowError;

    fn try_from(row: ChatMessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            role: Role::parse(&row.role).ok_or_else(|| schema_error("role", &row.role))?,
            content: row.content,
            created_at: row.created_at,
        })
    }
}

impl CommitmentRow {
    fn into_commitment(
        self,
        validators: Vec<ValidatorAssignment>,
        checkins: BTreeSet<NaiveDate>,
    ) -> Result<Commitment, VowError> {
        Ok(Commitment {
            id: self.id,
            owner_id: self.owner_id,
            owner_name: self.owner_name,
            title: self.title,
            description: self.description,
            mode: CommitmentMode::parse(&self.mode).ok_or_else(|| schema_error("mode", &self.mode))?,
            stake_cents: self.stake_cents,
            duration_days: self.duration_days,
            start_date: self.start_date,
            end_date: self.end_date,
            fund_destination: self.fund_destination,
            validators,
            checkins,
            status: CommitmentStatus::parse(&self.status)
                .ok_or_else(|| schema_error("status", &self.status))?,
            owner_marked_complete: self.owner_marked_complete,
            created_at: self.created_at,
        })
    }
}

// ============================================================================
// RemoteDatabase impl
// ============================================================================

#[async_trait]
impl RemoteDatabase for PgRemote {
    async fn fetch_tasks(&self, user_id: Uuid) -> Result<Vec<Task>, VowError> {
        let tasks = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, user_id, title, target_sessions, completed_sessions, completed, created_at
            FROM tasks
            WHERE user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    async fn fetch_sessions(&self, user_id: Uuid) -> Result<Vec<PomodoroSession>, VowError> {
        let sessions = sqlx::query_as::<_, PomodoroSession>(
            r#"
            SELECT id, user_id, task_id, duration_minutes, completed, started_at, completed_at
            FROM pomodoro_sessions
            WHERE user_id = $1
            ORDER BY started_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn fetch_commitments(&self, user_id: Uuid) -> Result<Vec<Commitment>, VowError> {
        let rows = sqlx::query_as::<_, CommitmentRow>(
            r#"
            SELECT c.id, c.owner_id, p.display_name AS owner_name, c.title, c.description,
                   c.mode, c.stake_cents, c.duration_days, c.start_date, c.end_date,
                   c.fund_destination, c.status, c.owner_marked_complete, c.created_at
            FROM commitments c
            JOIN profiles p ON p.id = c.owner_id
            WHERE c.owner_id = $1
               OR EXISTS (
                   SELECT 1 FROM commitment_validators v
                   WHERE v.commitment_id = c.id AND v.validator_id = $1
               )
            ORDER BY c.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let validator_rows = sqlx::query_as::<_, ValidatorRow>(
            r#"
            SELECT v.commitment_id, v.validator_id, p.display_name, v.decision
            FROM commitment_validators v
            JOIN profiles p ON p.id = v.validator_id
            WHERE v.commitment_id = ANY($1)
            ORDER BY v.created_at
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let checkin_rows = sqlx::query_as::<_, CheckinRow>(
            "SELECT commitment_id, day FROM commitment_checkins WHERE commitment_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut validators: HashMap<Uuid, Vec<ValidatorAssignment>> = HashMap::new();
        for row in validator_rows {
            let commitment_id = row.commitment_id;
            validators
                .entry(commitment_id)
                .or_default()
                .push(ValidatorAssignment::try_from(row)?);
        }

        let mut checkins: HashMap<Uuid, BTreeSet<NaiveDate>> = HashMap::new();
        for row in checkin_rows {
            checkins.entry(row.commitment_id).or_default().insert(row.day);
        }

        rows.into_iter()
            .map(|row| {
                let id = row.id;
                row.into_commitment(
                    validators.remove(&id).unwrap_or_default(),
                    checkins.remove(&id).unwrap_or_default(),
                )
            })
            .collect()
    }

    async fn fetch_chat_messages(&self, user_id: Uuid) -> Result<Vec<ChatMessage>, VowError> {
        let rows = sqlx::query_as::<_, ChatMessageRow>(
            r#"
            SELECT id, user_id, role, content, created_at
            FROM chat_messages
            WHERE user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>, VowError> {
        let profile = sqlx::query_as::<_, Profile>(
            "SELECT id, username, email, display_name, balance_cents FROM profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn find_profile_by_username(&self, username: &str) -> Result<Option<Profile>, VowError> {
        let profile = sqlx::query_as::<_, Profile>(
            r#"
            SELECT id, username, email, display_name, balance_cents
            FROM profiles
            WHERE lower(username) = lower($1)
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, VowError> {
        let profile = sqlx::query_as::<_, Profile>(
            r#"
            SELECT id, username, email, display_name, balance_cents
            FROM profiles
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn insert_task(&self, task: &Task) -> Result<(), VowError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, user_id, title, target_sessions, completed_sessions, completed, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(task.id)
        .bind(task.user_id)
        .bind(&task.title)
        .bind(task.target_sessions)
        .bind(task.completed_sessions)
        .bind(task.completed)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<(), VowError> {
        sqlx::query("UPDATE tasks SET completed_sessions = $2, completed = $3 WHERE id = $1")
            .bind(task.id)
            .bind(task.completed_sessions)
            .bind(task.completed)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<(), VowError> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_session(
        &self,
        session: &PomodoroSession,
        task: Option<&Task>,
    ) -> Result<(), VowError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pomodoro_sessions (id, user_id, task_id, duration_minutes, completed, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.task_id)
        .bind(session.duration_minutes)
        .bind(session.completed)
        .bind(session.started_at)
        .bind(session.completed_at)
        .execute(&mut *tx)
        .await?;

        if let Some(task) = task {
            sqlx::query("UPDATE tasks SET completed_sessions = $2, completed = $3 WHERE id = $1")
                .bind(task.id)
                .bind(task.completed_sessions)
                .bind(task.completed)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_commitment(&self, commitment: &Commitment) -> Result<(), VowError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO commitments (id, owner_id, title, description, mode, stake_cents,
                                     duration_days, start_date, end_date, fund_destination,
                                     status, owner_marked_complete, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(commitment.id)
        .bind(commitment.owner_id)
        .bind(&commitment.title)
        .bind(&commitment.description)
        .bind(commitment.mode.as_str())
        .bind(commitment.stake_cents)
        .bind(commitment.duration_days)
        .bind(commitment.start_date)
        .bind(commitment.end_date)
        .bind(&commitment.fund_destination)
        .bind(commitment.status.as_str())
        .bind(commitment.owner_marked_complete)
        .bind(commitment.created_at)
        .execute(&mut *tx)
        .await?;

        for validator in &commitment.validators {
            sqlx::query(
                r#"
                INSERT INTO commitment_validators (commitment_id, validator_id, decision)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(commitment.id)
            .bind(validator.validator_id)
            .bind(validator.decision.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_checkin(&self, commitment_id: Uuid, day: NaiveDate) -> Result<(), VowError> {
        sqlx::query(
            r#"
            INSERT INTO commitment_checkins (commitment_id, day)
            VALUES ($1, $2)
            ON CONFLICT (commitment_id, day) DO NOTHING
            "#,
        )
        .bind(commitment_id)
        .bind(day)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_commitment_status(
        &self,
        commitment_id: Uuid,
        owner_marked_complete: bool,
        status: CommitmentStatus,
    ) -> Result<(), VowError> {
        sqlx::query(
            "UPDATE commitments SET owner_marked_complete = $2, status = $3 WHERE id = $1",
        )
        .bind(commitment_id)
        .bind(owner_marked_complete)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_validation(
        &self,
        commitment_id: Uuid,
        validator_id: Uuid,
        decision: ValidatorDecision,
        status: CommitmentStatus,
    ) -> Result<(), VowError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE commitment_validators
            SET decision = $3, decided_at = now()
            WHERE commitment_id = $1 AND validator_id = $2
            "#,
        )
        .bind(commitment_id)
        .bind(validator_id)
        .bind(decision.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(VowError::Other(format!(
                "validator {} is not assigned to commitment {}",
                validator_id, commitment_id
            )));
        }

        sqlx::query("UPDATE commitments SET status = $2 WHERE id = $1")
            .bind(commitment_id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_chat_message(&self, message: &ChatMessage) -> Result<(), VowError> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, user_id, role, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(message.id)
        .bind(message.user_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_chat_messages(&self, user_id: Uuid) -> Result<(), VowError> {
        sqlx::query("DELETE FROM chat_messages WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
