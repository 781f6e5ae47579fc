//! vow-cli — terminal client for the Vow advisor service
//!
//! # Subcommands
//! - `chat <message...> [--json]` — ask the advisor one question
//! - `prompt-info`                — show the active system prompt
//! - `diagnose`                   — round-trip a test trace to telemetry
//! - `status`                     — show server health

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "vow-cli", version, about = "Talk to the Vow advisor service")]
struct Cli {
    /// Vow HTTP server URL (overrides VOW_HTTP_URL env var)
    #[arg(long, env = "VOW_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one message to the advisor
    Chat {
        /// Message text; multiple words are joined with spaces
        #[arg(required = true)]
        message: Vec<String>,

        /// Print the raw JSON reply
        #[arg(long)]
        json: bool,
    },

    /// Show which system prompt the server is using
    PromptInfo,

    /// Send a diagnostic trace through the telemetry pipeline
    Diagnose,

    /// Show Vow server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub content: String,
    pub trace_id: Option<String>,
}

// ============================================================================
// Formatting (pure)
// ============================================================================

pub fn chat_body(message: &str) -> serde_json::Value {
    serde_json::json!({
        "messages": [{ "role": "user", "content": message }]
    })
}

pub fn format_prompt_info(body: &serde_json::Value) -> Vec<String> {
    let optimizer = body["optimizer"].as_str().unwrap_or("none");
    vec![
        format!("Version:    {}", body["version"].as_str().unwrap_or("?")),
        format!("Length:     {} chars", body["promptLength"].as_u64().unwrap_or(0)),
        format!(
            "Optimized:  {}",
            if body["optimized"].as_bool().unwrap_or(false) { "yes" } else { "no" }
        ),
        format!("Optimizer:  {}", optimizer),
    ]
}

pub fn format_status(body: &serde_json::Value) -> Vec<String> {
    let completion = if body["completion"]["configured"].as_bool().unwrap_or(false) {
        body["completion"]["model"].as_str().unwrap_or("configured").to_string()
    } else {
        "not configured".to_string()
    };

    let telemetry = &body["telemetry"];
    let telemetry_line = match telemetry["stats"].as_object() {
        Some(stats) => format!(
            "{} (delivered {}, failed {}, dropped {})",
            telemetry["sink"].as_str().unwrap_or("?"),
            stats.get("delivered").and_then(|v| v.as_u64()).unwrap_or(0),
            stats.get("failed").and_then(|v| v.as_u64()).unwrap_or(0),
            stats.get("dropped").and_then(|v| v.as_u64()).unwrap_or(0),
        ),
        None => telemetry["sink"].as_str().unwrap_or("disabled").to_string(),
    };

    let judge = &body["judge"];
    let judge_line = if judge["enabled"].as_bool().unwrap_or(false) {
        format!(
            "enabled (completed {}, failed {}, dropped {})",
            judge["stats"]["completed"].as_u64().unwrap_or(0),
            judge["stats"]["failed"].as_u64().unwrap_or(0),
            judge["stats"]["dropped"].as_u64().unwrap_or(0),
        )
    } else {
        "disabled".to_string()
    };

    let database = &body["database"];
    let database_line = if !database["configured"].as_bool().unwrap_or(false) {
        "not configured".to_string()
    } else if let Some(version) = database["postgresql"].as_str() {
        version.to_string()
    } else {
        format!("error: {}", database["error"].as_str().unwrap_or("?"))
    };

    vec![
        format!("Vow server:  {}", body["status"].as_str().unwrap_or("unknown")),
        format!("Version:     {}", body["version"].as_str().unwrap_or("?")),
        format!("Uptime:      {}s", body["uptime_seconds"].as_u64().unwrap_or(0)),
        format!("Completion:  {}", completion),
        format!("Telemetry:   {}", telemetry_line),
        format!("Judge:       {}", judge_line),
        format!("Prompt:      {}", body["prompt_version"].as_str().unwrap_or("?")),
        format!("PostgreSQL:  {}", database_line),
    ]
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

fn get_json(server: &str, path: &str) -> anyhow::Result<serde_json::Value> {
    let url = format!("{}{}", server, path);
    let resp = match client(30)?.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("vow-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("vow-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    Ok(resp.json()?)
}

fn do_chat(server: &str, message: &str, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/api/chat", server);
    let resp = match client(60)?.post(&url).json(&chat_body(message)).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("vow-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let body: serde_json::Value = resp.json()?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let reply: ChatReply = serde_json::from_value(body)?;
    println!("{}", reply.content);
    if let Some(trace_id) = reply.trace_id {
        eprintln!("\ntrace: {}", trace_id);
    }
    Ok(())
}

fn do_prompt_info(server: &str) -> anyhow::Result<()> {
    let body = get_json(server, "/api/prompt-info")?;
    for line in format_prompt_info(&body) {
        println!("{}", line);
    }
    Ok(())
}

fn do_diagnose(server: &str) -> anyhow::Result<()> {
    let body = get_json(server, "/api/telemetry/diagnostic")?;
    let trace_id = body["traceId"].as_str().unwrap_or("-");

    if body["success"].as_bool().unwrap_or(false) {
        println!("Telemetry OK, trace {}", trace_id);
        Ok(())
    } else {
        eprintln!(
            "Telemetry check failed (trace {}): {}",
            trace_id,
            body["error"].as_str().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
}

fn do_status(server: &str) -> anyhow::Result<()> {
    let body = get_json(server, "/health")?;
    for line in format_status(&body) {
        println!("{}", line);
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Chat { message, json } => do_chat(&server, &message.join(" "), json),
        Commands::PromptInfo => do_prompt_info(&server),
        Commands::Diagnose => do_diagnose(&server),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("vow-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
