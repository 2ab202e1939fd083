//! Token counting
//!
//! Uses the cl100k_base BPE so budget math matches what the chat model
//! actually sees. The tokenizer is built once and shared.

use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, CoreBPE};

static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| cl100k_base().ok());

/// Estimate the token count of a text. Falls back to a chars/4 heuristic
/// if the tokenizer data failed to load.
pub fn estimate_tokens(text: &str) -> usize {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count() / 4 + 1,
    }
}

/// Token count of a user/assistant exchange as it appears in context
pub fn estimate_exchange_tokens(user_text: &str, assistant_text: &str) -> usize {
    estimate_tokens(user_text) + estimate_tokens(assistant_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_longer_text_more_tokens() {
        let short = estimate_tokens("hello");
        let long = estimate_tokens("hello there, this is a much longer sentence about things");
        assert!(long > short);
    }

    #[test]
    fn test_exchange_is_sum() {
        let u = "what is rust";
        let a = "a systems programming language";
        assert_eq!(
            estimate_exchange_tokens(u, a),
            estimate_tokens(u) + estimate_tokens(a)
        );
    }
}
