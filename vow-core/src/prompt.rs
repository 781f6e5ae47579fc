//! System prompt resolution.
//!
//! Override files are checked in configured order; the first one that exists
//! and holds more than [`MIN_PROMPT_CHARS`] characters wins. Otherwise the
//! built-in prompt is used. Resolution happens once at startup.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::PromptCandidate;

/// Override files at or below this length are ignored.
pub const MIN_PROMPT_CHARS: usize = 50;

/// Version tag reported for the built-in prompt.
pub const DEFAULT_PROMPT_VERSION: &str = "default";

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are Vow, a focused accountability coach. You help people turn resolutions \
into commitments they can keep: breaking goals into concrete daily actions, \
planning pomodoro focus sessions, and deciding whether to commit or stake money \
on a goal and who should validate it.

Keep answers short and practical. Prefer numbered steps or bullet lists for plans. \
Ask one clarifying question when the goal is vague. Never give financial, medical \
or legal advice beyond general encouragement, and never pressure anyone into \
staking money.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptSource {
    BuiltIn,
    File {
        path: PathBuf,
        optimizer: Option<String>,
    },
}

/// The active system prompt and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPrompt {
    pub text: String,
    pub version: String,
    pub source: PromptSource,
    /// Parsed `<stem>.meta.json` sibling, if present and valid.
    pub meta: Option<serde_json::Value>,
}

/// Body of the prompt-info endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptInfo {
    pub version: String,
    pub prompt_length: usize,
    pub optimized: bool,
    pub optimizer: Option<String>,
    pub meta: Option<serde_json::Value>,
}

impl LoadedPrompt {
    pub fn built_in() -> Self {
        Self {
            text: DEFAULT_SYSTEM_PROMPT.to_string(),
            version: DEFAULT_PROMPT_VERSION.to_string(),
            source: PromptSource::BuiltIn,
            meta: None,
        }
    }

    pub fn is_optimized(&self) -> bool {
        matches!(self.source, PromptSource::File { .. })
    }

    /// Optimizer named by the candidate config, falling back to the metadata file.
    pub fn optimizer(&self) -> Option<String> {
        match &self.source {
            PromptSource::BuiltIn => None,
            PromptSource::File { optimizer, .. } => optimizer.clone().or_else(|| {
                self.meta
                    .as_ref()
                    .and_then(|m| m.get("optimizer"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            }),
        }
    }

    pub fn info(&self) -> PromptInfo {
        PromptInfo {
            version: self.version.clone(),
            prompt_length: self.text.chars().count(),
            optimized: self.is_optimized(),
            optimizer: self.optimizer(),
            meta: self.meta.clone(),
        }
    }
}

/// Resolve the active prompt from the candidate list.
pub fn load_prompt(candidates: &[PromptCandidate]) -> LoadedPrompt {
    for candidate in candidates {
        let path = PathBuf::from(shellexpand::tilde(&candidate.path).as_ref());

        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t.trim().to_string(),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Prompt candidate unreadable");
                continue;
            }
        };

        if text.chars().count() <= MIN_PROMPT_CHARS {
            tracing::debug!(path = %path.display(), "Prompt candidate too short, skipping");
            continue;
        }

        let meta = read_meta(&path);
        tracing::info!(
            path = %path.display(),
            version = %candidate.version,
            "Using system prompt override"
        );

        return LoadedPrompt {
            text,
            version: candidate.version.clone(),
            source: PromptSource::File {
                path,
                optimizer: candidate.optimizer.clone(),
            },
            meta,
        };
    }

    tracing::info!("Using built-in system prompt");
    LoadedPrompt::built_in()
}

fn meta_path(prompt_path: &Path) -> PathBuf {
    prompt_path.with_extension("meta.json")
}

fn read_meta(prompt_path: &Path) -> Option<serde_json::Value> {
    let path = meta_path(prompt_path);
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed prompt metadata");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG_A: &str = "Prompt A: you are a coach who helps people plan their goals every single day.";
    const LONG_B: &str = "Prompt B: you are a different coach that also exceeds the fifty character minimum.";

    fn candidate(path: &Path, version: &str) -> PromptCandidate {
        PromptCandidate {
            path: path.to_string_lossy().into_owned(),
            version: version.to_string(),
            optimizer: None,
        }
    }

    #[test]
    fn test_no_candidates_uses_built_in() {
        let prompt = load_prompt(&[]);
        assert_eq!(prompt.version, DEFAULT_PROMPT_VERSION);
        assert_eq!(prompt.source, PromptSource::BuiltIn);
        assert!(!prompt.info().optimized);
    }

    #[test]
    fn test_first_non_trivial_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, LONG_A).unwrap();
        std::fs::write(&b, LONG_B).unwrap();

        let prompt = load_prompt(&[candidate(&a, "v-a"), candidate(&b, "v-b")]);
        assert_eq!(prompt.version, "v-a");
        assert_eq!(prompt.text, LONG_A);

        let reversed = load_prompt(&[candidate(&b, "v-b"), candidate(&a, "v-a")]);
        assert_eq!(reversed.version, "v-b");
    }

    #[test]
    fn test_short_and_missing_candidates_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short.txt");
        let missing = dir.path().join("missing.txt");
        let good = dir.path().join("good.txt");
        std::fs::write(&short, "too short").unwrap();
        std::fs::write(&good, LONG_B).unwrap();

        let prompt = load_prompt(&[
            candidate(&missing, "missing"),
            candidate(&short, "short"),
            candidate(&good, "good"),
        ]);
        assert_eq!(prompt.version, "good");
    }

    #[test]
    fn test_exactly_fifty_chars_is_trivial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fifty.txt");
        std::fs::write(&path, "x".repeat(MIN_PROMPT_CHARS)).unwrap();

        let prompt = load_prompt(&[candidate(&path, "fifty")]);
        assert_eq!(prompt.source, PromptSource::BuiltIn);
    }

    #[test]
    fn test_meta_sibling_is_parsed_and_reports_optimizer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system_prompt.txt");
        std::fs::write(&path, LONG_A).unwrap();
        std::fs::write(
            dir.path().join("system_prompt.meta.json"),
            r#"{"optimizer": "evolutionary", "score": 0.82}"#,
        )
        .unwrap();

        let prompt = load_prompt(&[candidate(&path, "optimized")]);
        let info = prompt.info();
        assert!(info.optimized);
        assert_eq!(info.optimizer.as_deref(), Some("evolutionary"));
        assert_eq!(info.meta.unwrap()["score"], 0.82);
        assert_eq!(info.prompt_length, LONG_A.chars().count());
    }

    #[test]
    fn test_malformed_meta_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system_prompt.txt");
        std::fs::write(&path, LONG_A).unwrap();
        std::fs::write(dir.path().join("system_prompt.meta.json"), "{not json").unwrap();

        let prompt = load_prompt(&[candidate(&path, "optimized")]);
        assert!(prompt.meta.is_none());
        assert!(prompt.is_optimized());
    }
}
