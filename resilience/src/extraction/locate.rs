//! Locating candidate structured text inside free-form model output.

use std::sync::OnceLock;

use regex::Regex;

/// Content of the first fenced code block tagged `json`.
pub fn tagged_fence(text: &str) -> Option<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    let re = RE.get_or_init(|| {
        Regex::new(r"(?is)```[ \t]*json\b[ \t]*\r?\n?(.*?)```").expect("tagged fence regex compiles")
    });
    first_capture(re, text)
}

/// Content of the first fenced code block, whatever its tag.
pub fn any_fence(text: &str) -> Option<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    let re = RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[ \t]*\r?\n?(.*?)```").expect("fence regex compiles")
    });
    first_capture(re, text)
}

fn first_capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum QuoteMode {
    /// Skip over both `"..."` and `'...'` strings.
    Both,
    /// Only `"..."` strings; apostrophes are plain text.
    DoubleOnly,
}

/// The first balanced `open ... close` span, e.g. the outermost `{...}`.
///
/// Delimiters inside string literals are ignored. A scan that treats single
/// quotes as string delimiters is tried first; if it cannot close the span (an
/// apostrophe inside a word can derail it) a scan aware of double quotes only
/// is tried.
pub fn balanced_span(text: &str, open: char, close: char) -> Result<&str, String> {
    let start = text
        .find(open)
        .ok_or_else(|| format!("no '{open}' found in response"))?;

    [QuoteMode::Both, QuoteMode::DoubleOnly]
        .into_iter()
        .find_map(|mode| scan(text, start, open, close, mode))
        .map(|end| &text[start..end])
        .ok_or_else(|| {
            format!("unbalanced '{open}...{close}' span starting at byte {start} (truncated response?)")
        })
}

/// Returns the byte index just past the matching `close`.
fn scan(text: &str, start: usize, open: char, close: char, mode: QuoteMode) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;
    let mut last_significant = open;

    for (offset, c) in text[start..].char_indices() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
                last_significant = c;
            }
            continue;
        }

        match c {
            '"' => in_string = Some('"'),
            '\'' if mode == QuoteMode::Both && starts_value(last_significant) => {
                in_string = Some('\'');
            }
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset + c.len_utf8());
                }
            }
            _ => {}
        }
        if !c.is_whitespace() {
            last_significant = c;
        }
    }
    None
}

/// Whether a string literal may begin right after `prev`.
const fn starts_value(prev: char) -> bool {
    matches!(prev, '{' | '[' | '(' | ',' | ':')
}
