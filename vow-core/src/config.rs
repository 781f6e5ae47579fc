use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Environment variable holding the completion API key.
pub const COMPLETION_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Environment variables holding the observability credential triple.
pub const TELEMETRY_API_KEY_ENV: &str = "OPIK_API_KEY";
pub const TELEMETRY_WORKSPACE_ENV: &str = "OPIK_WORKSPACE";
pub const TELEMETRY_PROJECT_ENV: &str = "OPIK_PROJECT_NAME";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct VowConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Empty `url` means the service runs without a database connection.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Upper bound on waiting for a connection, health checks included.
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
            acquire_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_seconds: u64,
    /// Extra attempts after the first one; 0 means a single attempt.
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.7,
            max_output_tokens: 1024,
            timeout_seconds: 30,
            max_retries: 0,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `opik` submits over HTTP, `memory` keeps events in process.
    pub backend: String,
    pub base_url: String,
    pub project_name: String,
    pub queue_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            backend: "opik".to_string(),
            base_url: "https://www.comet.com/opik/api".to_string(),
            project_name: "vow-advisor".to_string(),
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JudgeConfig {
    pub enabled: bool,
    pub queue_capacity: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 64,
            temperature: 0.0,
            max_output_tokens: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptCandidate {
    pub path: String,
    pub version: String,
    #[serde(default)]
    pub optimizer: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PromptConfig {
    pub candidates: Vec<PromptCandidate>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                PromptCandidate {
                    path: "prompts/optimized/system_prompt.txt".to_string(),
                    version: "optimized".to_string(),
                    optimizer: Some("metaprompt".to_string()),
                },
                PromptCandidate {
                    path: "prompts/system_prompt.txt".to_string(),
                    version: "custom".to_string(),
                    optimizer: None,
                },
            ],
        }
    }
}

/// Credentials read from the environment, never from the config file.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub completion_api_key: Option<String>,
    pub telemetry: Option<TelemetryCredentials>,
}

#[derive(Debug, Clone)]
pub struct TelemetryCredentials {
    pub api_key: String,
    pub workspace: String,
    pub project_name: String,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Blank values count as absent. The observability triple is all-or-nothing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let telemetry = match (
            get(TELEMETRY_API_KEY_ENV),
            get(TELEMETRY_WORKSPACE_ENV),
            get(TELEMETRY_PROJECT_ENV),
        ) {
            (Some(api_key), Some(workspace), Some(project_name)) => Some(TelemetryCredentials {
                api_key,
                workspace,
                project_name,
            }),
            _ => None,
        };

        Self {
            completion_api_key: get(COMPLETION_API_KEY_ENV),
            telemetry,
        }
    }
}

impl VowConfig {
    /// Load from a TOML file, then apply `VOW__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("VOW").separator("__"))
            .build()?;
        let mut config: VowConfig = s.try_deserialize()?;

        if config.database.url.is_empty() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                config.database.url = url;
            }
        }

        Ok(config)
    }
}
