// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Output post-processing hook for the CLI backend (spec.md §4.3, §9).
//!
//! Whether markdown code fences get stripped from captured stdout is an
//! open question in the source spec. Decision (recorded in DESIGN.md): a
//! post-processor is optional and bound once, at backend registration,
//! rather than re-decided per job — so behavior is stable for the
//! lifetime of a registry.

use std::sync::Arc;

pub type PostProcessor = Arc<dyn Fn(String) -> String + Send + Sync>;

/// Strip a single leading/trailing fenced code block (` ``` `, optionally
/// with a language tag) from captured CLI output, leaving everything else
/// untouched.
pub fn strip_code_fences(output: String) -> String {
    let trimmed = output.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return output;
    };
    let after_open = match after_open.find('\n') {
        Some(idx) => &after_open[idx + 1..],
        None => return output,
    };
    match after_open.rfind("```") {
        Some(idx) => after_open[..idx].trim_end_matches('\n').to_string(),
        None => output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_block_with_language_tag() {
        let input = "```json\n{\"a\":1}\n```".to_string();
        assert_eq!(strip_code_fences(input), "{\"a\":1}");
    }

    #[test]
    fn leaves_unfenced_output_untouched() {
        let input = "plain output".to_string();
        assert_eq!(strip_code_fences(input.clone()), input);
    }

    #[test]
    fn leaves_unterminated_fence_untouched() {
        let input = "```\nno closing fence".to_string();
        assert_eq!(strip_code_fences(input.clone()), input);
    }
}
