use thiserror::Error;

#[derive(Error, Debug)]
pub enum VowError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Other error: {0}")]
    Other(String),
}
