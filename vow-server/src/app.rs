//! Composition root — builds every client once and owns their shutdown.

use std::sync::Arc;

use anyhow::{bail, Result};
use sqlx::PgPool;
use tokio::task::JoinHandle;

use vow_core::config::{TelemetryConfig, TelemetryCredentials};
use vow_core::judge::{JudgeQueue, ShutdownPolicy};
use vow_core::{
    load_prompt, CompletionBackend, ConversationProxy, Credentials, GeminiCompletionClient,
    MemorySink, OpikClient, TelemetryRecorder, TelemetrySink, VowConfig,
};

pub struct App {
    pub config: VowConfig,
    pub proxy: Arc<ConversationProxy>,
    pub pool: Option<PgPool>,
    telemetry_worker: Option<JoinHandle<()>>,
}

impl App {
    /// Wire the proxy, telemetry, judge and database pool. Must run inside a
    /// Tokio runtime because the background workers are spawned here.
    pub fn build(config: VowConfig, credentials: &Credentials) -> Result<Self> {
        let (recorder, telemetry_worker) =
            build_recorder(&config.telemetry, credentials.telemetry.as_ref())?;

        let completion: Option<Arc<dyn CompletionBackend>> = match &credentials.completion_api_key
        {
            Some(key) => Some(Arc::new(GeminiCompletionClient::new(
                key.clone(),
                config.completion.clone(),
            )?)),
            None => {
                tracing::warn!("GEMINI_API_KEY not set, chat will answer with the unavailability message");
                None
            }
        };

        let prompt = load_prompt(&config.prompt.candidates);
        tracing::info!(
            version = %prompt.version,
            length = prompt.text.chars().count(),
            "System prompt loaded"
        );

        let mut proxy =
            ConversationProxy::new(completion.clone(), recorder.clone(), prompt, &config.completion);

        // Judge results only go to telemetry.
        let telemetry_enabled = recorder.is_enabled();
        match (&completion, config.judge.enabled, telemetry_enabled) {
            (Some(backend), true, true) => {
                let judge = JudgeQueue::spawn(Arc::clone(backend), recorder, config.judge.clone());
                proxy = proxy.with_judge(judge);
            }
            (_, false, _) => tracing::info!("Judge disabled by configuration"),
            (None, true, _) => tracing::info!("Judge disabled: no completion credential"),
            (Some(_), true, false) => tracing::info!("Judge disabled: telemetry off"),
        }

        let pool = if config.database.url.is_empty() {
            None
        } else {
            match vow_core::db::create_lazy_pool(&config.database) {
                Ok(pool) => Some(pool),
                Err(e) => {
                    tracing::warn!("Database pool unavailable: {}", e);
                    None
                }
            }
        };

        Ok(Self {
            config,
            proxy: Arc::new(proxy),
            pool,
            telemetry_worker,
        })
    }

    /// Drain the judge first (it produces telemetry), then the recorder.
    pub async fn shutdown(self) {
        if let Some(judge) = self.proxy.judge() {
            judge.shutdown(ShutdownPolicy::Drain).await;
        }

        let recorder = self.proxy.recorder();
        if recorder.is_enabled() {
            recorder.shutdown().await;
        }
        if let Some(worker) = self.telemetry_worker {
            if let Err(e) = worker.await {
                tracing::error!("Telemetry worker panicked: {}", e);
            }
        }

        if let Some(pool) = self.pool {
            pool.close().await;
        }
        tracing::info!("Vow server shut down");
    }
}

/// Pick the telemetry sink. `opik` without a complete credential triple
/// disables telemetry instead of failing startup.
pub fn build_recorder(
    config: &TelemetryConfig,
    credentials: Option<&TelemetryCredentials>,
) -> Result<(TelemetryRecorder, Option<JoinHandle<()>>)> {
    let sink: Arc<dyn TelemetrySink> = match config.backend.as_str() {
        "opik" => match credentials {
            Some(credentials) => Arc::new(OpikClient::new(credentials, config)?),
            None => {
                tracing::warn!("Opik credentials incomplete, telemetry disabled");
                return Ok((TelemetryRecorder::disabled(), None));
            }
        },
        "memory" => Arc::new(MemorySink::new()),
        "none" | "disabled" => return Ok((TelemetryRecorder::disabled(), None)),
        other => bail!("Unknown telemetry backend: {}", other),
    };

    let (recorder, worker) = TelemetryRecorder::spawn(sink, config.queue_capacity);
    Ok((recorder, Some(worker)))
}
