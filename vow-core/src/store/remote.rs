use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::VowError;
use crate::models::{
    ChatMessage, Commitment, CommitmentStatus, PomodoroSession, Profile, Task, ValidatorDecision,
};

/// Remote system of record behind the [`DataStore`](super::DataStore).
///
/// Fetches return rows visible to `user_id`: owned records, plus commitments
/// where the user is a validator. Writes are single logical operations; an
/// implementation that needs several statements runs them atomically.
#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    async fn fetch_tasks(&self, user_id: Uuid) -> Result<Vec<Task>, VowError>;

    async fn fetch_sessions(&self, user_id: Uuid) -> Result<Vec<PomodoroSession>, VowError>;

    /// Owned and delegated commitments with display names resolved.
    async fn fetch_commitments(&self, user_id: Uuid) -> Result<Vec<Commitment>, VowError>;

    async fn fetch_chat_messages(&self, user_id: Uuid) -> Result<Vec<ChatMessage>, VowError>;

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>, VowError>;

    async fn find_profile_by_username(&self, username: &str) -> Result<Option<Profile>, VowError>;

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, VowError>;

    async fn insert_task(&self, task: &Task) -> Result<(), VowError>;

    /// Persist the task's progress counters and completion flag.
    async fn update_task(&self, task: &Task) -> Result<(), VowError>;

    async fn delete_task(&self, task_id: Uuid) -> Result<(), VowError>;

    /// Insert a session and, when it counts toward a task, that task's new counters.
    async fn insert_session(
        &self,
        session: &PomodoroSession,
        task: Option<&Task>,
    ) -> Result<(), VowError>;

    /// Insert a commitment together with its validator assignments.
    async fn insert_commitment(&self, commitment: &Commitment) -> Result<(), VowError>;

    async fn insert_checkin(&self, commitment_id: Uuid, day: NaiveDate) -> Result<(), VowError>;

    async fn update_commitment_status(
        &self,
        commitment_id: Uuid,
        owner_marked_complete: bool,
        status: CommitmentStatus,
    ) -> Result<(), VowError>;

    /// Store a validator decision and the commitment status it implies.
    async fn record_validation(
        &self,
        commitment_id: Uuid,
        validator_id: Uuid,
        decision: ValidatorDecision,
        status: CommitmentStatus,
    ) -> Result<(), VowError>;

    async fn insert_chat_message(&self, message: &ChatMessage) -> Result<(), VowError>;

    async fn delete_chat_messages(&self, user_id: Uuid) -> Result<(), VowError>;
}
