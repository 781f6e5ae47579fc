use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use vow_core::{Credentials, VowConfig};
use vow_server::app::App;
use vow_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "vow.toml")]
    config: String,

    /// Check the database connection and exit
    #[arg(long)]
    health: bool,

    /// Apply pending database migrations before serving
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match VowConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if args.health {
        if config.database.url.is_empty() {
            println!("❌ No database configured (set DATABASE_URL or [database] url)");
            std::process::exit(1);
        }
        let pool = vow_core::db::create_pool(&config.database).await?;
        match vow_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let credentials = Credentials::from_env();
    let app = App::build(config, &credentials)?;

    if args.migrate {
        match &app.pool {
            Some(pool) => {
                vow_core::db::run_migrations(pool).await?;
                tracing::info!("Database migrations applied");
            }
            None => tracing::warn!("--migrate given but no database is configured"),
        }
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = Arc::new(HttpState::new(Arc::clone(&app.proxy), app.pool.clone()));
    let served = http::start_http_server(state, &app.config.http, tx.subscribe()).await;

    app.shutdown().await;
    served
}
