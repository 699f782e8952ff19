//! Recovery of structured JSON from untrusted LLM responses.
//!
//! Responses routinely wrap JSON in markdown fences, prepend prose, or
//! truncate mid-structure. Every stage funnels its raw response through
//! [`extract_json`] + [`parse_json`]; anything still unreadable is a
//! `Parse` error at the task level, never a panic.

use crate::{StoryboardError, StoryboardErrorKind, StoryboardResult};
use tracing::debug;

/// Pull the JSON payload out of a response that may contain markdown
/// fences or surrounding prose.
///
/// Strategies, in order:
/// 1. ```` ```json ```` fenced block (tolerating a missing closing fence)
/// 2. first balanced `[...]` or `{...}`, whichever opens earlier
///
/// # Errors
///
/// Returns `Parse` if no JSON-looking payload is found.
pub fn extract_json(response: &str) -> StoryboardResult<String> {
    if let Some(fenced) = fenced_block(response) {
        return Ok(fenced);
    }

    let bracket = response.find('[');
    let brace = response.find('{');
    let candidates: &[(char, char)] = match (bracket, brace) {
        (Some(b), Some(c)) if b < c => &[('[', ']'), ('{', '}')],
        (Some(_), None) => &[('[', ']')],
        _ => &[('{', '}'), ('[', ']')],
    };

    for (open, close) in candidates {
        if let Some(body) = balanced(response, *open, *close) {
            return Ok(body);
        }
    }

    Err(StoryboardError::new(StoryboardErrorKind::Parse(format!(
        "no JSON found in response ({} chars)",
        response.len()
    ))))
}

/// Parse extracted JSON into a concrete type, repairing a truncated
/// trailing element when the initial parse fails.
///
/// # Errors
///
/// Returns `Parse` when the text cannot be interpreted as `T` even
/// after truncation repair.
pub fn parse_json<T>(json_str: &str) -> StoryboardResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let trimmed = json_str.trim();
    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            // A response cut off by max_tokens usually dies inside the
            // last element; dropping it and closing delimiters often
            // leaves a usable prefix.
            if let Some(repaired) = close_truncated(trimmed) {
                if let Ok(value) = serde_json::from_str(&repaired) {
                    debug!(
                        original = trimmed.len(),
                        repaired = repaired.len(),
                        "parsed JSON after truncation repair"
                    );
                    return Ok(value);
                }
            }
            let preview: String = trimmed.chars().take(120).collect();
            Err(StoryboardError::new(StoryboardErrorKind::Parse(format!(
                "{first_err} (JSON starts: {preview})"
            ))))
        }
    }
}

/// Convenience: extract then parse in one step.
pub fn extract_and_parse<T>(response: &str) -> StoryboardResult<T>
where
    T: serde::de::DeserializeOwned,
{
    parse_json(&extract_json(response)?)
}

/// Deserialize an integer the LLM may have quoted or written as a float.
///
/// Use with `#[serde(default, deserialize_with = "lenient_u32")]`.
pub fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
        Null,
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Int(v) => v.max(0) as u32,
        Raw::Float(v) if v.is_finite() && v >= 0.0 => v.round() as u32,
        Raw::Float(_) => 0,
        Raw::Text(s) => s.trim().parse().unwrap_or(0),
        Raw::Null => 0,
    })
}

/// Deserialize a string list the LLM may have written as a JSON array,
/// a comma-separated string, or null.
pub fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<serde_json::Value>),
        Text(String),
        Null,
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(values) => values
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Raw::Text(s) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        Raw::Null => Vec::new(),
    })
}

fn fenced_block(response: &str) -> Option<String> {
    let start = response.find("```")?;
    // Skip the fence line itself (possibly carrying a language tag).
    let after_fence = &response[start + 3..];
    let body_start = after_fence.find('\n').map(|n| n + 1).unwrap_or(0);
    let body = &after_fence[body_start..];

    let content = match body.find("```") {
        Some(end) => &body[..end],
        // Missing closing fence: likely truncated, take the rest.
        None => body,
    };
    Some(content.trim().to_string())
}

fn balanced(response: &str, open: char, close: char) -> Option<String> {
    let start = response.find(open)?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in response[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(response[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Cut a truncated JSON string back to its last complete element and
/// close the open delimiters.
fn close_truncated(json: &str) -> Option<String> {
    // Walk once, remembering the position just after the most recent
    // closing delimiter: everything up to there is complete, whatever
    // partial value follows it gets dropped. Truncation frequently lands
    // mid-string, so EOF inside a string is the expected case here.
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut last_complete: Option<usize> = None;

    for (offset, ch) in json.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '[' | '{' if !in_string => stack.push(ch),
            ']' | '}' if !in_string => {
                stack.pop();
                last_complete = Some(offset + 1);
            }
            _ => {}
        }
    }

    let cut = last_complete?;
    let mut repaired = json[..cut].to_string();
    // Re-scan the prefix for still-open delimiters and close them.
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in repaired.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '[' | '{' if !in_string => stack.push(ch),
            ']' | '}' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }
    for open in stack.into_iter().rev() {
        repaired.push(if open == '[' { ']' } else { '}' });
    }
    Some(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
        name: String,
    }

    #[test]
    fn extracts_fenced_json() {
        let response = "Here you go:\n```json\n[{\"id\": 1, \"name\": \"a\"}]\n```\nDone.";
        let items: Vec<Item> = extract_and_parse(response).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, 1);
    }

    #[test]
    fn extracts_bare_object_after_prose() {
        let response = "The analysis: {\"id\": 2, \"name\": \"b\"} hope that helps!";
        let item: Item = extract_and_parse(response).unwrap();
        assert_eq!(item, Item { id: 2, name: "b".into() });
    }

    #[test]
    fn prefers_earlier_array_over_object() {
        let response = "[{\"id\": 3, \"name\": \"c\"}] and also {\"x\": 1}";
        let items: Vec<Item> = extract_and_parse(response).unwrap();
        assert_eq!(items[0].id, 3);
    }

    #[test]
    fn repairs_truncated_array() {
        let truncated = "[{\"id\": 1, \"name\": \"a\"}, {\"id\": 2, \"nam";
        let items: Vec<Item> = parse_json(truncated).unwrap();
        assert_eq!(items, vec![Item { id: 1, name: "a".into() }]);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let response = "{\"id\": 4, \"name\": \"curly } brace\"}";
        let item: Item = extract_and_parse(response).unwrap();
        assert_eq!(item.name, "curly } brace");
    }

    #[test]
    fn no_json_is_a_parse_error() {
        let err = extract_json("I refuse to answer.").unwrap_err();
        assert!(matches!(err.kind(), StoryboardErrorKind::Parse(_)));
    }
}
