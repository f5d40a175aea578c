//! Prompt assembly for answer synthesis.

use crate::types::RetrievedItem;

/// Rough characters-per-token ratio for English text with BPE tokenizers.
const CHARS_PER_TOKEN: usize = 4;

/// Maximum characters of an item body placed in the context block.
const SNIPPET_BODY_CHARS: usize = 1_200;

/// Share of lines kept from each end when the context is over budget.
const KEEP_HEAD: f32 = 0.3;
const KEEP_TAIL: f32 = 0.3;

const TRUNCATION_MARKER: &str = "\n[... context truncated ...]\n";

pub const SYSTEM_PERSONA: &str = "You are the dojo's knowledge assistant. Answer questions about \
techniques, training, curriculum, events and membership using only the numbered context \
snippets provided. Cite snippets inline as [1], [2], ... when you use them. If the context \
does not contain the answer, say so plainly and suggest where the student might look next. \
Keep answers concise and encouraging.";

/// Approximate token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

/// One indexed snippet per item: `[n] title` followed by the trimmed body.
pub fn build_context_block(items: &[RetrievedItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let title = if item.payload.title.is_empty() {
                format!("{} {}", item.origin_collection, item.id)
            } else {
                item.payload.title.clone()
            };
            format!(
                "[{}] {}\n{}",
                i + 1,
                title,
                truncate_chars(&item.payload.body, SNIPPET_BODY_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Fit `context` into `budget_tokens`.
///
/// Keeps the first and last ~30% of lines and replaces the middle with an
/// elision marker. If that is still over budget (few, very long lines) the
/// text is cut to equal character spans from each end around a truncation
/// marker.
pub fn trim_to_budget(context: &str, budget_tokens: usize) -> String {
    if estimate_tokens(context) <= budget_tokens {
        return context.to_string();
    }

    let lines: Vec<&str> = context.lines().collect();
    let head = ((lines.len() as f32) * KEEP_HEAD).ceil() as usize;
    let tail = ((lines.len() as f32) * KEEP_TAIL).ceil() as usize;

    let trimmed = if head + tail < lines.len() {
        let omitted = lines.len() - head - tail;
        let mut kept: Vec<String> = lines[..head].iter().map(|l| l.to_string()).collect();
        kept.push(format!("[... {omitted} lines omitted ...]"));
        kept.extend(lines[lines.len() - tail..].iter().map(|l| l.to_string()));
        kept.join("\n")
    } else {
        context.to_string()
    };

    if estimate_tokens(&trimmed) <= budget_tokens {
        return trimmed;
    }

    let max_chars = budget_tokens * CHARS_PER_TOKEN;
    let marker_chars = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker_chars {
        return trimmed.chars().take(max_chars).collect();
    }
    let side = (max_chars - marker_chars) / 2;
    let chars: Vec<char> = trimmed.chars().collect();
    let head: String = chars[..side].iter().collect();
    let tail: String = chars[chars.len() - side..].iter().collect();
    format!("{head}{TRUNCATION_MARKER}{tail}")
}

/// User turn of the answer prompt. Carries the caller's original wording.
pub fn answer_user_message(context: &str, original_query: &str) -> String {
    format!(
        "Context:\n{context}\n\nQuestion: {}\n\nAnswer using the context above.",
        original_query.trim()
    )
}

pub fn related_queries_prompt(original_query: &str, items: &[RetrievedItem], count: usize) -> String {
    let titles: Vec<&str> = items
        .iter()
        .map(|i| i.payload.title.as_str())
        .filter(|t| !t.is_empty())
        .take(5)
        .collect();
    format!(
        "A student searched for: \"{}\"\nRelated material: {}\n\nSuggest {count} short follow-up \
         searches they might try next. Reply with one suggestion per line and nothing else.",
        original_query.trim(),
        if titles.is_empty() {
            "none".to_string()
        } else {
            titles.join("; ")
        }
    )
}

/// Parse a line-per-suggestion reply, stripping bullets, numbering and quotes.
pub fn parse_suggestions(reply: &str, original_query: &str, count: usize) -> Vec<String> {
    let original = original_query.trim().to_lowercase();
    let mut out: Vec<String> = Vec::new();
    for line in reply.lines() {
        let cleaned = line
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '-' | '*' | '•' | '.' | ')'))
            .trim()
            .trim_matches('"')
            .trim();
        if cleaned.is_empty() || cleaned.to_lowercase() == original {
            continue;
        }
        if out.iter().any(|s| s.eq_ignore_ascii_case(cleaned)) {
            continue;
        }
        out.push(cleaned.to_string());
        if out.len() == count {
            break;
        }
    }
    out
}
