//! Client data store — a per-user mirror of the remote database.
//!
//! Reads are served from the cache. Every mutation updates the cache first,
//! then issues the remote write; when the write fails the local change is
//! reverted, a [`SyncFailure`] is recorded and [`StoreError::Sync`] returned.
//! Mutations take `&mut self`, so there is exactly one writer per store.

pub mod postgres;
pub mod remote;
pub mod streak;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::VowError;
use crate::models::{
    ChatMessage, Commitment, CommitmentMode, CommitmentStatus, NewCommitment, PomodoroSession,
    Role, Task, ValidatorAssignment, ValidatorDecision,
};

pub use postgres::PgRemote;
pub use remote::RemoteDatabase;
pub use streak::STREAK_LOOKBACK_DAYS;

/// Longest commitment that can be created, in days.
pub const MAX_COMMITMENT_DAYS: u32 = 365;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store has not been loaded")]
    NotReady,

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Insufficient balance: stake needs {required} cents, {available} available")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("None of the listed validators could be found")]
    NoValidators,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Not permitted: {0}")]
    Forbidden(String),

    #[error("Owner has not marked the commitment complete yet")]
    AwaitingOwner,

    #[error("Remote read failed: {0}")]
    Remote(#[from] VowError),

    #[error("Remote write failed during {operation}: {source}")]
    Sync {
        operation: &'static str,
        #[source]
        source: VowError,
    },
}

/// A remote write that failed after its local update was reverted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailure {
    pub operation: &'static str,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Inverse of one optimistic cache change.
enum Undo {
    RemoveTask(Uuid),
    RestoreTask(Task),
    ReinsertTask(usize, Task),
    RemoveSession(Uuid),
    RemoveCommitment(Uuid),
    RestoreCommitment(Commitment),
    RemoveChatMessage(Uuid),
    RestoreChat(Vec<ChatMessage>),
}

#[derive(Debug, Default)]
struct Cache {
    tasks: Vec<Task>,
    sessions: Vec<PomodoroSession>,
    commitments: Vec<Commitment>,
    chat: Vec<ChatMessage>,
}

pub struct DataStore {
    remote: Arc<dyn RemoteDatabase>,
    user_id: Uuid,
    cache: Cache,
    ready: bool,
    sync_failures: Vec<SyncFailure>,
}

impl DataStore {
    pub fn new(remote: Arc<dyn RemoteDatabase>, user_id: Uuid) -> Self {
        Self {
            remote,
            user_id,
            cache: Cache::default(),
            ready: false,
            sync_failures: Vec::new(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Fetch everything visible to the user and replace the cache.
    ///
    /// The four fetches run concurrently. On any failure the previous cache
    /// and readiness are kept.
    pub async fn load(&mut self) -> Result<(), StoreError> {
        let remote = Arc::clone(&self.remote);
        let user_id = self.user_id;

        let (tasks, sessions, commitments, chat) = tokio::try_join!(
            remote.fetch_tasks(user_id),
            remote.fetch_sessions(user_id),
            remote.fetch_commitments(user_id),
            remote.fetch_chat_messages(user_id),
        )?;

        tracing::info!(
            %user_id,
            tasks = tasks.len(),
            sessions = sessions.len(),
            commitments = commitments.len(),
            chat = chat.len(),
            "Data store loaded"
        );

        self.cache = Cache {
            tasks,
            sessions,
            commitments,
            chat,
        };
        self.ready = true;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn tasks(&self) -> &[Task] {
        &self.cache.tasks
    }

    pub fn sessions(&self) -> &[PomodoroSession] {
        &self.cache.sessions
    }

    pub fn commitments(&self) -> &[Commitment] {
        &self.cache.commitments
    }

    pub fn owned_commitments(&self) -> impl Iterator<Item = &Commitment> {
        self.cache
            .commitments
            .iter()
            .filter(move |c| c.is_owned_by(self.user_id))
    }

    pub fn validating_commitments(&self) -> impl Iterator<Item = &Commitment> {
        self.cache
            .commitments
            .iter()
            .filter(move |c| c.validator(self.user_id).is_some())
    }

    /// Commitments whose owner claimed completion and that still wait on this user.
    pub fn awaiting_my_decision(&self) -> impl Iterator<Item = &Commitment> {
        self.validating_commitments().filter(move |c| {
            c.owner_marked_complete
                && c.status == CommitmentStatus::Active
                && c.validator(self.user_id)
                    .is_some_and(|v| v.decision == ValidatorDecision::Pending)
        })
    }

    pub fn chat_messages(&self) -> &[ChatMessage] {
        &self.cache.chat
    }

    pub fn sync_failures(&self) -> &[SyncFailure] {
        &self.sync_failures
    }

    pub fn take_sync_failures(&mut self) -> Vec<SyncFailure> {
        std::mem::take(&mut self.sync_failures)
    }

    /// Consecutive days up to `today` with a completed session or a check-in.
    pub fn streak(&self, today: NaiveDate) -> u32 {
        let mut active_days: BTreeSet<NaiveDate> = self
            .cache
            .sessions
            .iter()
            .filter(|s| s.completed)
            .map(|s| s.completed_at.unwrap_or(s.started_at).date_naive())
            .collect();

        for commitment in self.owned_commitments() {
            active_days.extend(commitment.checkins.iter().copied());
        }

        streak::streak(&active_days, today)
    }

    // ------------------------------------------------------------------------
    // Tasks and sessions
    // ------------------------------------------------------------------------

    pub async fn add_task(&mut self, title: &str, target_sessions: u32) -> Result<Task, StoreError> {
        self.ensure_ready()?;
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::Invalid("task title is required".to_string()));
        }
        let target_sessions = i32::try_from(target_sessions)
            .ok()
            .filter(|t| *t > 0)
            .ok_or_else(|| StoreError::Invalid("target sessions must be positive".to_string()))?;

        let task = Task {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            title: title.to_string(),
            target_sessions,
            completed_sessions: 0,
            completed: false,
            created_at: Utc::now(),
        };
        self.cache.tasks.push(task.clone());

        let remote = Arc::clone(&self.remote);
        let result = remote.insert_task(&task).await;
        self.settle("add_task", result, vec![Undo::RemoveTask(task.id)])?;
        Ok(task)
    }

    pub async fn complete_task(&mut self, task_id: Uuid) -> Result<(), StoreError> {
        self.ensure_ready()?;
        let index = self.task_index(task_id)?;
        if self.cache.tasks[index].completed {
            return Ok(());
        }

        let snapshot = self.cache.tasks[index].clone();
        self.cache.tasks[index].completed = true;
        let updated = self.cache.tasks[index].clone();

        let remote = Arc::clone(&self.remote);
        let result = remote.update_task(&updated).await;
        self.settle("complete_task", result, vec![Undo::RestoreTask(snapshot)])
    }

    pub async fn delete_task(&mut self, task_id: Uuid) -> Result<(), StoreError> {
        self.ensure_ready()?;
        let index = self.task_index(task_id)?;
        let removed = self.cache.tasks.remove(index);

        let remote = Arc::clone(&self.remote);
        let result = remote.delete_task(task_id).await;
        self.settle("delete_task", result, vec![Undo::ReinsertTask(index, removed)])
    }

    /// Log a finished focus session. A linked task gains one completed
    /// session and is marked complete once it reaches its target.
    pub async fn record_session(
        &mut self,
        task_id: Option<Uuid>,
        duration_minutes: u32,
        started_at: DateTime<Utc>,
    ) -> Result<PomodoroSession, StoreError> {
        self.ensure_ready()?;
        let duration_minutes = i32::try_from(duration_minutes)
            .ok()
            .filter(|d| *d > 0)
            .ok_or_else(|| StoreError::Invalid("duration must be positive".to_string()))?;
        let task_index = task_id.map(|id| self.task_index(id)).transpose()?;

        let session = PomodoroSession {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            task_id,
            duration_minutes,
            completed: true,
            started_at,
            completed_at: Some(Utc::now()),
        };

        let mut undo = vec![Undo::RemoveSession(session.id)];
        self.cache.sessions.push(session.clone());

        let updated_task = match task_index {
            Some(index) => {
                undo.push(Undo::RestoreTask(self.cache.tasks[index].clone()));
                let task = &mut self.cache.tasks[index];
                task.completed_sessions += 1;
                if task.completed_sessions >= task.target_sessions {
                    task.completed = true;
                }
                Some(task.clone())
            }
            None => None,
        };

        let remote = Arc::clone(&self.remote);
        let result = remote.insert_session(&session, updated_task.as_ref()).await;
        self.settle("record_session", result, undo)?;
        Ok(session)
    }

    // ------------------------------------------------------------------------
    // Commitments
    // ------------------------------------------------------------------------

    /// Validate, check the stake against the owner's balance, resolve
    /// validators, then insert. Nothing is written when any check fails.
    pub async fn create_commitment(
        &mut self,
        input: NewCommitment,
    ) -> Result<Commitment, StoreError> {
        self.ensure_ready()?;

        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(StoreError::Invalid("commitment title is required".to_string()));
        }
        if input.duration_days == 0 || input.duration_days > MAX_COMMITMENT_DAYS {
            return Err(StoreError::Invalid(format!(
                "duration must be between 1 and {} days",
                MAX_COMMITMENT_DAYS
            )));
        }
        let stake_cents = match input.mode {
            CommitmentMode::Commit => 0,
            CommitmentMode::Stake => {
                if input.stake_cents <= 0 {
                    return Err(StoreError::Invalid("stake must be positive".to_string()));
                }
                if input.validators.iter().all(|v| v.trim().is_empty()) {
                    return Err(StoreError::Invalid(
                        "stake mode requires at least one validator".to_string(),
                    ));
                }
                input.stake_cents
            }
        };

        let remote = Arc::clone(&self.remote);
        let owner = remote
            .fetch_profile(self.user_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "profile",
                id: self.user_id,
            })?;

        if input.mode == CommitmentMode::Stake && owner.balance_cents < stake_cents {
            return Err(StoreError::InsufficientBalance {
                required: stake_cents,
                available: owner.balance_cents,
            });
        }

        let validators =
            resolve_validators(remote.as_ref(), self.user_id, &input.validators).await?;
        if input.mode == CommitmentMode::Stake && validators.is_empty() {
            return Err(StoreError::NoValidators);
        }

        let commitment = Commitment {
            id: Uuid::new_v4(),
            owner_id: self.user_id,
            owner_name: owner.display_name,
            title,
            description: input.description.clone().filter(|d| !d.trim().is_empty()),
            mode: input.mode,
            stake_cents,
            duration_days: input.duration_days as i32,
            start_date: input.start_date,
            end_date: input.end_date(),
            fund_destination: input.fund_destination.clone(),
            validators,
            checkins: BTreeSet::new(),
            status: CommitmentStatus::Active,
            owner_marked_complete: false,
            created_at: Utc::now(),
        };
        self.cache.commitments.push(commitment.clone());

        let result = remote.insert_commitment(&commitment).await;
        self.settle(
            "create_commitment",
            result,
            vec![Undo::RemoveCommitment(commitment.id)],
        )?;

        tracing::info!(
            commitment_id = %commitment.id,
            mode = commitment.mode.as_str(),
            validators = commitment.validators.len(),
            "Commitment created"
        );
        Ok(commitment)
    }

    /// Record the owner's check-in for `day`. Repeat check-ins are no-ops.
    pub async fn checkin_commitment(
        &mut self,
        commitment_id: Uuid,
        day: NaiveDate,
    ) -> Result<(), StoreError> {
        self.ensure_ready()?;
        let index = self.owned_active_commitment(commitment_id)?;

        let commitment = &self.cache.commitments[index];
        if day < commitment.start_date || day > commitment.end_date {
            return Err(StoreError::Invalid(format!(
                "{} is outside {}..={}",
                day, commitment.start_date, commitment.end_date
            )));
        }
        if commitment.checkins.contains(&day) {
            return Ok(());
        }

        let snapshot = commitment.clone();
        self.cache.commitments[index].checkins.insert(day);

        let remote = Arc::clone(&self.remote);
        let result = remote.insert_checkin(commitment_id, day).await;
        self.settle(
            "checkin_commitment",
            result,
            vec![Undo::RestoreCommitment(snapshot)],
        )
    }

    /// Owner claims completion. Without validators the commitment completes
    /// at once; otherwise it waits on their decisions.
    pub async fn mark_commitment_complete(
        &mut self,
        commitment_id: Uuid,
    ) -> Result<CommitmentStatus, StoreError> {
        self.ensure_ready()?;
        let index = self.owned_active_commitment(commitment_id)?;
        if self.cache.commitments[index].owner_marked_complete {
            return Ok(self.cache.commitments[index].status);
        }

        let snapshot = self.cache.commitments[index].clone();
        let commitment = &mut self.cache.commitments[index];
        commitment.owner_marked_complete = true;
        commitment.status = commitment.resolved_status();
        let status = commitment.status;

        let remote = Arc::clone(&self.remote);
        let result = remote
            .update_commitment_status(commitment_id, true, status)
            .await;
        self.settle(
            "mark_commitment_complete",
            result,
            vec![Undo::RestoreCommitment(snapshot)],
        )?;
        Ok(status)
    }

    /// Record this user's decision as a validator.
    pub async fn validate_commitment(
        &mut self,
        commitment_id: Uuid,
        decision: ValidatorDecision,
    ) -> Result<CommitmentStatus, StoreError> {
        self.ensure_ready()?;
        if decision == ValidatorDecision::Pending {
            return Err(StoreError::Invalid(
                "decision must be approved or rejected".to_string(),
            ));
        }

        let index = self.commitment_index(commitment_id)?;
        let user_id = self.user_id;
        let commitment = &self.cache.commitments[index];
        if commitment.validator(user_id).is_none() {
            return Err(StoreError::Forbidden(
                "only assigned validators can decide".to_string(),
            ));
        }
        if !commitment.owner_marked_complete {
            return Err(StoreError::AwaitingOwner);
        }
        if commitment.status != CommitmentStatus::Active {
            return Err(StoreError::Invalid(format!(
                "commitment is already {}",
                commitment.status.as_str()
            )));
        }

        let snapshot = commitment.clone();
        let commitment = &mut self.cache.commitments[index];
        for assignment in commitment
            .validators
            .iter_mut()
            .filter(|v| v.validator_id == user_id)
        {
            assignment.decision = decision;
        }
        commitment.status = commitment.resolved_status();
        let status = commitment.status;

        let remote = Arc::clone(&self.remote);
        let result = remote
            .record_validation(commitment_id, user_id, decision, status)
            .await;
        self.settle(
            "validate_commitment",
            result,
            vec![Undo::RestoreCommitment(snapshot)],
        )?;
        Ok(status)
    }

    // ------------------------------------------------------------------------
    // Chat history
    // ------------------------------------------------------------------------

    pub async fn add_chat_message(
        &mut self,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        self.ensure_ready()?;
        if content.trim().is_empty() {
            return Err(StoreError::Invalid("message is empty".to_string()));
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.cache.chat.push(message.clone());

        let remote = Arc::clone(&self.remote);
        let result = remote.insert_chat_message(&message).await;
        self.settle(
            "add_chat_message",
            result,
            vec![Undo::RemoveChatMessage(message.id)],
        )?;
        Ok(message)
    }

    pub async fn clear_chat(&mut self) -> Result<(), StoreError> {
        self.ensure_ready()?;
        if self.cache.chat.is_empty() {
            return Ok(());
        }
        let previous = std::mem::take(&mut self.cache.chat);

        let remote = Arc::clone(&self.remote);
        let result = remote.delete_chat_messages(self.user_id).await;
        self.settle("clear_chat", result, vec![Undo::RestoreChat(previous)])
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn ensure_ready(&self) -> Result<(), StoreError> {
        if self.ready {
            Ok(())
        } else {
            Err(StoreError::NotReady)
        }
    }

    fn task_index(&self, task_id: Uuid) -> Result<usize, StoreError> {
        self.cache
            .tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or(StoreError::NotFound {
                entity: "task",
                id: task_id,
            })
    }

    fn commitment_index(&self, commitment_id: Uuid) -> Result<usize, StoreError> {
        self.cache
            .commitments
            .iter()
            .position(|c| c.id == commitment_id)
            .ok_or(StoreError::NotFound {
                entity: "commitment",
                id: commitment_id,
            })
    }

    fn owned_active_commitment(&self, commitment_id: Uuid) -> Result<usize, StoreError> {
        let index = self.commitment_index(commitment_id)?;
        let commitment = &self.cache.commitments[index];
        if !commitment.is_owned_by(self.user_id) {
            return Err(StoreError::Forbidden(
                "only the owner can change this commitment".to_string(),
            ));
        }
        if commitment.status != CommitmentStatus::Active {
            return Err(StoreError::Invalid(format!(
                "commitment is already {}",
                commitment.status.as_str()
            )));
        }
        Ok(index)
    }

    /// Keep the optimistic change on success, revert it on failure.
    fn settle(
        &mut self,
        operation: &'static str,
        result: Result<(), VowError>,
        undo: Vec<Undo>,
    ) -> Result<(), StoreError> {
        let Err(source) = result else {
            return Ok(());
        };

        for step in undo.into_iter().rev() {
            self.revert(step);
        }

        tracing::warn!(operation, error = %source, "Remote write failed, local change reverted");
        self.sync_failures.push(SyncFailure {
            operation,
            message: source.to_string(),
            at: Utc::now(),
        });
        Err(StoreError::Sync { operation, source })
    }

    fn revert(&mut self, step: Undo) {
        let cache = &mut self.cache;
        match step {
            Undo::RemoveTask(id) => cache.tasks.retain(|t| t.id != id),
            Undo::RestoreTask(task) => {
                if let Some(slot) = cache.tasks.iter_mut().find(|t| t.id == task.id) {
                    *slot = task;
                }
            }
            Undo::ReinsertTask(index, task) => {
                let index = index.min(cache.tasks.len());
                cache.tasks.insert(index, task);
            }
            Undo::RemoveSession(id) => cache.sessions.retain(|s| s.id != id),
            Undo::RemoveCommitment(id) => cache.commitments.retain(|c| c.id != id),
            Undo::RestoreCommitment(commitment) => {
                if let Some(slot) = cache
                    .commitments
                    .iter_mut()
                    .find(|c| c.id == commitment.id)
                {
                    *slot = commitment;
                }
            }
            Undo::RemoveChatMessage(id) => cache.chat.retain(|m| m.id != id),
            Undo::RestoreChat(messages) => cache.chat = messages,
        }
    }
}

/// Look each identifier up by username, then by email. Unknown identifiers,
/// the owner and duplicates are skipped.
async fn resolve_validators(
    remote: &dyn RemoteDatabase,
    owner_id: Uuid,
    identifiers: &[String],
) -> Result<Vec<ValidatorAssignment>, VowError> {
    let mut resolved: Vec<ValidatorAssignment> = Vec::new();

    for identifier in identifiers.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
        let profile = match remote.find_profile_by_username(identifier).await? {
            Some(profile) => Some(profile),
            None => remote.find_profile_by_email(identifier).await?,
        };

        match profile {
            None => {
                tracing::warn!(identifier, "Validator not found, skipping");
            }
            Some(profile) if profile.id == owner_id => {
                tracing::warn!(identifier, "Owner cannot validate their own commitment, skipping");
            }
            Some(profile) if resolved.iter().any(|v| v.validator_id == profile.id) => {}
            Some(profile) => resolved.push(ValidatorAssignment {
                validator_id: profile.id,
                display_name: profile.display_name,
                decision: ValidatorDecision::Pending,
            }),
        }
    }

    Ok(resolved)
}
