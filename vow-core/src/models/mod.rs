pub mod chat;
pub mod commitment;
pub mod message;
pub mod profile;
pub mod task;
pub mod telemetry;

pub use chat::ChatMessage;
pub use commitment::{
    Commitment, CommitmentMode, CommitmentStatus, NewCommitment, ValidatorAssignment,
    ValidatorDecision,
};
pub use message::{Message, Role};
pub use profile::Profile;
pub use task::{PomodoroSession, Task};
pub use telemetry::{FeedbackScore, Span, SpanType, TokenUsage, Trace, TraceEnd};
