//! Runs against a real PostgreSQL when `VOW_TEST_DATABASE_URL` is set;
//! otherwise each test returns early.

use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use vow_core::db;
use vow_core::models::{CommitmentMode, NewCommitment, Role, ValidatorDecision};
use vow_core::store::{DataStore, PgRemote};

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("VOW_TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.expect("Failed to connect to Postgres");
    db::run_migrations(&pool).await.expect("migrations apply");
    Some(pool)
}

async fn insert_profile(pool: &PgPool, username: &str, balance_cents: i64) -> Uuid {
    let id = Uuid::new_v4();
    let suffix = &id.to_string()[..8];
    sqlx::query(
        "INSERT INTO profiles (id, username, email, display_name, balance_cents) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(format!("{}-{}", username, suffix))
    .bind(format!("{}-{}@example.com", username, suffix))
    .bind(username.to_uppercase())
    .bind(balance_cents)
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn username_of(pool: &PgPool, id: Uuid) -> String {
    let row: (String,) = sqlx::query_as("SELECT username FROM profiles WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap();
    row.0
}

async fn cleanup(pool: &PgPool, ids: &[Uuid]) {
    sqlx::query("DELETE FROM profiles WHERE id = ANY($1)")
        .bind(ids)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_commitment_round_trip_through_postgres() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let owner = insert_profile(&pool, "owner", 10_000).await;
    let validator = insert_profile(&pool, "validator", 0).await;
    let validator_name = username_of(&pool, validator).await;

    let remote = Arc::new(PgRemote::new(pool.clone()));
    let mut store = DataStore::new(remote.clone(), owner);
    store.load().await.unwrap();

    let start = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
    let commitment = store
        .create_commitment(NewCommitment {
            title: "Run 5k".to_string(),
            description: None,
            mode: CommitmentMode::Stake,
            stake_cents: 2_000,
            duration_days: 10,
            start_date: start,
            fund_destination: None,
            validators: vec![validator_name],
        })
        .await
        .unwrap();
    store.checkin_commitment(commitment.id, start).await.unwrap();
    store.add_chat_message(Role::User, "hello").await.unwrap();

    let mut validator_store = DataStore::new(remote, validator);
    validator_store.load().await.unwrap();
    let seen = &validator_store.commitments()[0];
    assert_eq!(seen.id, commitment.id);
    assert_eq!(seen.owner_name, "OWNER");
    assert_eq!(seen.validators[0].decision, ValidatorDecision::Pending);
    assert!(seen.checkins.contains(&start));

    store.load().await.unwrap();
    assert_eq!(store.chat_messages().len(), 1);

    cleanup(&pool, &[owner, validator]).await;
}
