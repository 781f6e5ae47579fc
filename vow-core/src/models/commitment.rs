use std::collections::BTreeSet;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentMode {
    Commit,
    Stake,
}

impl CommitmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentMode::Commit => "commit",
            CommitmentMode::Stake => "stake",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "commit" => Some(CommitmentMode::Commit),
            "stake" => Some(CommitmentMode::Stake),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentStatus {
    Active,
    Completed,
    Failed,
}

impl CommitmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitmentStatus::Active => "active",
            CommitmentStatus::Completed => "completed",
            CommitmentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CommitmentStatus::Active),
            "completed" => Some(CommitmentStatus::Completed),
            "failed" => Some(CommitmentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorDecision {
    Pending,
    Approved,
    Rejected,
}

impl ValidatorDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatorDecision::Pending => "pending",
            ValidatorDecision::Approved => "approved",
            ValidatorDecision::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ValidatorDecision::Pending),
            "approved" => Some(ValidatorDecision::Approved),
            "rejected" => Some(ValidatorDecision::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorAssignment {
    pub validator_id: Uuid,
    pub display_name: String,
    pub decision: ValidatorDecision,
}

/// A goal the owner commits to, optionally backed by money.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_name: String,
    pub title: String,
    pub description: Option<String>,
    pub mode: CommitmentMode,
    pub stake_cents: i64,
    pub duration_days: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub fund_destination: Option<String>,
    pub validators: Vec<ValidatorAssignment>,
    pub checkins: BTreeSet<NaiveDate>,
    pub status: CommitmentStatus,
    /// Set when the owner claims completion; validators decide afterwards.
    pub owner_marked_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl Commitment {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    pub fn validator(&self, user_id: Uuid) -> Option<&ValidatorAssignment> {
        self.validators.iter().find(|v| v.validator_id == user_id)
    }

    /// Status implied by the completion claim and the validator decisions.
    ///
    /// Any rejection fails the commitment; it completes once every validator
    /// approved, or immediately when there are no validators.
    pub fn resolved_status(&self) -> CommitmentStatus {
        if !self.owner_marked_complete {
            return self.status;
        }
        if self
            .validators
            .iter()
            .any(|v| v.decision == ValidatorDecision::Rejected)
        {
            return CommitmentStatus::Failed;
        }
        if self
            .validators
            .iter()
            .all(|v| v.decision == ValidatorDecision::Approved)
        {
            return CommitmentStatus::Completed;
        }
        CommitmentStatus::Active
    }
}

/// Input for creating a commitment. Validators are usernames or emails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommitment {
    pub title: String,
    pub description: Option<String>,
    pub mode: CommitmentMode,
    pub stake_cents: i64,
    pub duration_days: u32,
    pub start_date: NaiveDate,
    pub fund_destination: Option<String>,
    pub validators: Vec<String>,
}

impl NewCommitment {
    /// Last day of the commitment, inclusive.
    pub fn end_date(&self) -> NaiveDate {
        let span = u64::from(self.duration_days.saturating_sub(1));
        self.start_date
            .checked_add_days(Days::new(span))
            .unwrap_or(NaiveDate::MAX)
    }
}
