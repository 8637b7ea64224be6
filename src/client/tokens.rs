//! Prompt size estimate used by the token-budget guard.
//!
//! This is a whitespace word count, not the provider's tokenizer. It only has
//! to be consistent: the budget guard compares estimates against each other
//! and against the model ceiling, never against real usage.

/// Number of whitespace-separated words in `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Combined estimate for a system and a user prompt.
pub fn estimate_prompts(system_prompt: &str, user_prompt: &str) -> usize {
    estimate_tokens(system_prompt) + estimate_tokens(user_prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_words() {
        assert_eq!(estimate_tokens("You are terse."), 3);
        assert_eq!(estimate_tokens("  Say\thi.\n"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_prompts_add_up() {
        assert_eq!(estimate_prompts("You are a helpful assistant.", "Say hi."), 7);
    }
}
