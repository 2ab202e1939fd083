//! Session summarization
//!
//! A model-backed summarizer is an external collaborator behind the
//! [`Summarizer`] trait. The crate ships an extractive fallback so ended
//! sessions can still be committed when no model is reachable.

use crate::error::Result;
use crate::tokens::estimate_tokens;

/// Maximum summary length in tokens, tiered by conversation size
pub fn summary_token_budget(message_count: usize) -> usize {
    if message_count <= 3 {
        192
    } else if message_count <= 10 {
        384
    } else {
        512
    }
}

/// Render (user, assistant) exchanges as a transcript for summarization
pub fn format_conversation(messages: &[(String, String)]) -> String {
    let mut out = String::new();
    for (user_text, assistant_text) in messages {
        out.push_str("User: ");
        out.push_str(user_text);
        out.push('\n');
        out.push_str("Assistant: ");
        out.push_str(assistant_text);
        out.push('\n');
    }
    out
}

/// Distills an ended session's exchanges into a compact memory summary
pub trait Summarizer: Send + Sync {
    /// Summarize ordered (user, assistant) exchanges. Treated as atomic:
    /// either a usable summary comes back or the call fails whole.
    fn summarize(&self, messages: &[(String, String)]) -> Result<String>;
}

/// Fallback summarizer that selects the most content-bearing sentences
/// instead of generating text. Scores sentences by term overlap with the
/// whole conversation's vocabulary.
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    fn sentences(text: &str) -> Vec<&str> {
        text.split(['.', '!', '?', '\n'])
            .map(str::trim)
            .filter(|s| s.len() > 20)
            .collect()
    }

    fn score(sentence: &str, vocabulary: &std::collections::HashMap<String, usize>) -> f64 {
        let words: Vec<String> = sentence
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(String::from)
            .collect();
        if words.is_empty() {
            return 0.0;
        }
        let total: usize = words
            .iter()
            .map(|w| vocabulary.get(w).copied().unwrap_or(0))
            .sum();
        total as f64 / words.len() as f64
    }
}

impl Summarizer for ExtractiveSummarizer {
    fn summarize(&self, messages: &[(String, String)]) -> Result<String> {
        if messages.is_empty() {
            return Ok(String::new());
        }

        let transcript = format_conversation(messages);
        let budget = summary_token_budget(messages.len());

        let mut vocabulary: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();
        for word in transcript.to_lowercase().split_whitespace() {
            if word.len() > 3 {
                *vocabulary.entry(word.to_string()).or_insert(0) += 1;
            }
        }

        let sentences = Self::sentences(&transcript);
        let mut ranked: Vec<(usize, &str, f64)> = sentences
            .iter()
            .enumerate()
            .map(|(i, s)| (i, *s, Self::score(s, &vocabulary)))
            .collect();
        ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        // Take the highest-scoring sentences up to the budget, then restore
        // transcript order so the summary reads chronologically
        let mut selected: Vec<(usize, &str)> = Vec::new();
        let mut used = 0usize;
        for (i, sentence, _) in &ranked {
            let cost = estimate_tokens(sentence);
            if used + cost > budget && !selected.is_empty() {
                continue;
            }
            selected.push((*i, *sentence));
            used += cost;
            if used >= budget {
                break;
            }
        }
        selected.sort_by_key(|(i, _)| *i);

        let summary = selected
            .iter()
            .map(|(_, s)| *s)
            .collect::<Vec<_>>()
            .join(". ");
        Ok(summary)
    }
}
