//! Heuristic quality signals computed from an advisor reply.
//!
//! All functions are pure and deterministic in the reply text.

use std::sync::OnceLock;

use regex::Regex;

pub const RESPONSE_LENGTH: &str = "response_length";
pub const ACTIONABILITY: &str = "actionability";
pub const TOPIC_RELEVANCE: &str = "topic_relevance";

/// Replies of this many words or more score a full `response_length`.
const FULL_LENGTH_WORDS: f64 = 200.0;

const TOPIC_KEYWORDS: [&str; 3] = ["pomodoro", "goal", "commit"];

/// A named heuristic score with a human-readable reason.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicScore {
    pub name: &'static str,
    pub value: f64,
    pub reason: String,
}

fn list_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:- |• |\d+\. |\d+\) )").expect("list pattern is valid")
    })
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// `min(word_count / 200, 1)`.
pub fn response_length(text: &str) -> f64 {
    (word_count(text) as f64 / FULL_LENGTH_WORDS).min(1.0)
}

/// 1.0 when any line opens a bulleted or numbered list, else 0.5.
pub fn actionability(text: &str) -> f64 {
    if list_pattern().is_match(text) {
        1.0
    } else {
        0.5
    }
}

/// 1.0 when the reply mentions a core topic keyword, else 0.7.
pub fn topic_relevance(text: &str) -> f64 {
    let lower = text.to_lowercase();
    if TOPIC_KEYWORDS.iter().any(|k| lower.contains(k)) {
        1.0
    } else {
        0.7
    }
}

/// Clamp a score into `[0, 1]`.
pub fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// The three heuristic scores submitted for every successful reply.
pub fn heuristic_scores(text: &str) -> Vec<HeuristicScore> {
    let words = word_count(text);
    let has_list = actionability(text) == 1.0;
    let on_topic = topic_relevance(text) == 1.0;

    vec![
        HeuristicScore {
            name: RESPONSE_LENGTH,
            value: response_length(text),
            reason: format!("{} words", words),
        },
        HeuristicScore {
            name: ACTIONABILITY,
            value: actionability(text),
            reason: if has_list {
                "Reply contains a bulleted or numbered list".to_string()
            } else {
                "Reply has no list structure".to_string()
            },
        },
        HeuristicScore {
            name: TOPIC_RELEVANCE,
            value: topic_relevance(text),
            reason: if on_topic {
                "Reply mentions pomodoro, goals or commitments".to_string()
            } else {
                "Reply does not mention a core topic".to_string()
            },
        },
    ]
}
