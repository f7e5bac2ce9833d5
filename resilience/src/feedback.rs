//! Reformat prompts sent when a reply could not be turned into structured output.

use serde_json::Value;

/// Marker appended when echoed output was cut short.
pub const TRUNCATION_MARKER: &str = "\n[... output truncated ...]";

/// Build a self-contained request asking the model to reformat `failed_text`.
///
/// The prompt never relies on earlier conversation: the text to reformat is
/// embedded verbatim (up to `excerpt_limit` chars). It includes:
/// - Attempt counter (e.g., "Attempt 1/2")
/// - Why the text could not be used
/// - The text itself
/// - Expected schema, when given
/// - Instruction to answer with JSON only
///
/// # Examples
///
/// ```
/// use metanovel_resilience::build_recovery_prompt;
/// use serde_json::json;
///
/// let schema = json!({"type": "object"});
/// let prompt = build_recovery_prompt("Name: Ada", "no '{' found in response", 1, 2, Some(&schema), 4000);
/// assert!(prompt.contains("Attempt 1/2"));
/// assert!(prompt.contains("Name: Ada"));
/// ```
#[must_use]
pub fn build_recovery_prompt(
    failed_text: &str,
    failure_reason: &str,
    attempt: u32,
    budget: u32,
    schema: Option<&Value>,
    excerpt_limit: usize,
) -> String {
    let mut prompt = format!(
        "Attempt {attempt}/{budget}: The text below was meant to be a JSON document, \
         but it could not be parsed as one.\n\n"
    );

    prompt.push_str("Problem: ");
    prompt.push_str(failure_reason);
    prompt.push_str("\n\n");

    prompt.push_str("Text to reformat:\n<<<\n");
    prompt.push_str(&truncate_chars(failed_text, excerpt_limit));
    prompt.push_str("\n>>>\n");

    if let Some(schema) = schema {
        prompt.push_str("\nExpected schema:\n");
        let schema_str =
            serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
        prompt.push_str(&schema_str);
        prompt.push('\n');
    }

    prompt.push_str(
        "\nRewrite the text above as a single valid JSON value that matches the expected \
         structure, keeping all of its content. Respond with the JSON only: no explanations, \
         no commentary, no markdown code fences.",
    );

    prompt
}

/// The first `limit` chars of `text`, with [`TRUNCATION_MARKER`] when cut.
#[must_use]
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((end, _)) => format!("{}{TRUNCATION_MARKER}", &text[..end]),
        None => text.to_string(),
    }
}
