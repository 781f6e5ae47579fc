pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod judge;
pub mod models;
pub mod prompt;
pub mod proxy;
pub mod scoring;
pub mod store;
pub mod telemetry;

pub use completion::{
    Completion, CompletionBackend, CompletionError, CompletionRequest, GeminiCompletionClient,
};
pub use config::{Credentials, TelemetryCredentials, VowConfig};
pub use error::VowError;
pub use judge::{JudgeJob, JudgeQueue, JudgeStatsSnapshot, ShutdownPolicy};
pub use prompt::{load_prompt, LoadedPrompt, PromptInfo};
pub use proxy::{ChatReply, ConversationProxy};
pub use store::{DataStore, PgRemote, RemoteDatabase, StoreError, SyncFailure};
pub use telemetry::{
    CallOutcome, MemorySink, OpikClient, TelemetryEvent, TelemetryRecorder, TelemetrySink,
    TelemetryStatsSnapshot,
};
