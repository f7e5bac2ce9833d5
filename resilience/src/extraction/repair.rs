//! Quote normalization for almost-JSON.
//!
//! Models regularly emit single-quoted strings, raw newlines inside strings,
//! unescaped inner quotes and trailing commas. [`repair_quotes`] rewrites those
//! into strict JSON and leaves valid JSON semantically unchanged.

/// Rewrites `text` so that every string literal is double-quoted and properly
/// escaped, and trailing commas before `}` or `]` are dropped.
///
/// A quote only closes a string when the next non-whitespace character is a
/// structural one (`,` `:` `}` `]`) or the end of input; any other quote is
/// treated as part of the string and escaped.
///
/// # Examples
///
/// ```
/// use metanovel_resilience::extraction::repair_quotes;
///
/// let fixed = repair_quotes("{'name': 'Ada', 'tags': ['a', 'b',],}");
/// assert_eq!(fixed, r#"{"name": "Ada", "tags": ["a", "b"]}"#);
/// ```
#[must_use]
pub fn repair_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut last_significant: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                i = copy_string(&chars, i, '"', &mut out);
                last_significant = Some('"');
                continue;
            }
            '\'' if last_significant.is_none_or(opens_value) => {
                i = copy_string(&chars, i, '\'', &mut out);
                last_significant = Some('"');
                continue;
            }
            ',' if matches!(next_significant(&chars, i + 1), Some('}' | ']')) => {}
            _ => out.push(c),
        }
        if !c.is_whitespace() {
            last_significant = Some(c);
        }
        i += 1;
    }
    out
}

const fn opens_value(prev: char) -> bool {
    matches!(prev, '{' | '[' | ',' | ':')
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|c| !c.is_whitespace())
}

/// Whether a quote at `chars[at - 1]` plausibly ends a string.
fn closes_string(chars: &[char], at: usize) -> bool {
    matches!(
        next_significant(chars, at),
        None | Some(',' | ':' | '}' | ']')
    )
}

/// Copies the string literal opening at `chars[start]` as a double-quoted JSON
/// string. Returns the index just past the closing quote. An unterminated
/// string is closed at end of input.
fn copy_string(chars: &[char], start: usize, quote: char, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                match chars.get(i + 1) {
                    Some('\'') => out.push('\''),
                    Some(&next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => {}
                }
                i += 2;
                continue;
            }
            c if c == quote => {
                if closes_string(chars, i + 1) {
                    out.push('"');
                    return i + 1;
                }
                if quote == '"' {
                    out.push_str("\\\"");
                } else {
                    out.push('\'');
                }
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", u32::from(c))),
            _ => out.push(c),
        }
        i += 1;
    }
    out.push('"');
    chars.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn parse(text: &str) -> Value {
        serde_json::from_str(&repair_quotes(text)).unwrap()
    }

    #[test]
    fn test_single_quotes_become_double() {
        assert_eq!(parse("{'a': 'x', 'b': ['y']}"), json!({"a": "x", "b": ["y"]}));
    }

    #[test]
    fn test_apostrophe_inside_single_quoted_string() {
        assert_eq!(parse("{'b': 'it's ok'}"), json!({"b": "it's ok"}));
    }

    #[test]
    fn test_unescaped_inner_double_quotes() {
        assert_eq!(
            parse(r#"{"line": "she said "run" and left"}"#),
            json!({"line": "she said \"run\" and left"})
        );
    }

    #[test]
    fn test_raw_newlines_are_escaped() {
        assert_eq!(
            parse("{\"text\": \"first\nsecond\"}"),
            json!({"text": "first\nsecond"})
        );
    }

    #[test]
    fn test_trailing_commas_removed() {
        assert_eq!(parse("{\"a\": [1, 2, ], }"), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_valid_json_unchanged_semantically() {
        let samples = [
            r#"{"a": "x, y", "b": {"c": [1, 2.5, null, true]}, "d": "say \"hi\""}"#,
            r#"[{"k": "v"}, "plain", 3]"#,
            r#"{"emoji": "\ud83d\ude00", "path": "C:\\dir"}"#,
            r#"{"a":"b","c":"d"}"#,
        ];
        for sample in samples {
            let original: Value = serde_json::from_str(sample).unwrap();
            assert_eq!(parse(sample), original, "changed: {sample}");
        }
    }

    #[test]
    fn test_unterminated_string_is_closed() {
        assert_eq!(repair_quotes("'abc"), "\"abc\"");
    }
}
