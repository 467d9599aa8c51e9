//! Parsing of model responses.
//!
//! Model output is untrusted: it may be wrapped in code fences, carry prose
//! around the payload, or be plain garbage. Parse failures are represented as
//! an explicit [`Parsed::Malformed`] value rather than an error so callers can
//! branch on the tag and fall back without unwinding.

use serde::de::DeserializeOwned;

/// Outcome of parsing a model response into a typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    /// The response parsed into the expected shape.
    Ok(T),
    /// The response could not be parsed; carries the reason for logs.
    Malformed(String),
}

impl<T> Parsed<T> {
    /// Return the parsed value, or `None` when malformed.
    pub fn ok(self) -> Option<T> {
        match self {
            Parsed::Ok(v) => Some(v),
            Parsed::Malformed(_) => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Parsed::Ok(_))
    }

    /// Map the parsed value, preserving the malformed tag.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        match self {
            Parsed::Ok(v) => Parsed::Ok(f(v)),
            Parsed::Malformed(reason) => Parsed::Malformed(reason),
        }
    }
}

/// Extract the first JSON object embedded in a model response and deserialize
/// it into `T`.
///
/// Tolerates markdown code fences and leading/trailing prose: the candidate
/// span runs from the first `{` to the last `}`.
pub fn extract_json_obj<T: DeserializeOwned>(response: &str) -> Parsed<T> {
    let stripped = strip_code_fences(response);
    let Some(start) = stripped.find('{') else {
        return Parsed::Malformed(format!("no JSON object in response: {}", preview(response)));
    };
    let Some(end) = stripped.rfind('}') else {
        return Parsed::Malformed(format!("unterminated JSON object: {}", preview(response)));
    };
    if end < start {
        return Parsed::Malformed(format!("no JSON object in response: {}", preview(response)));
    }
    match serde_json::from_str::<T>(&stripped[start..=end]) {
        Ok(v) => Parsed::Ok(v),
        Err(e) => Parsed::Malformed(format!("{e}: {}", preview(response))),
    }
}

/// Extract list items from a model answer.
///
/// Accepts `- item`, `* item`, `1. item`, and `[1] item` styles, one item per
/// line. Bracket-indexed lines are kept verbatim (the index is meaningful to
/// rewrite callers); other prefixes are stripped. Lines that are not list
/// items are ignored, and the vector is empty when the response carries no
/// list at all.
pub fn extract_list_items(response: &str) -> Vec<String> {
    let stripped = strip_code_fences(response);
    let mut items = Vec::new();
    for line in stripped.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
            if !rest.trim().is_empty() {
                items.push(rest.trim().to_string());
            }
            continue;
        }
        if is_bracket_indexed(line) {
            items.push(line.to_string());
            continue;
        }
        // numbered forms: "3. text" / "3) text"
        if let Some(rest) = strip_numbered_prefix(line) {
            if !rest.is_empty() {
                items.push(rest.to_string());
            }
        }
    }
    items
}

fn is_bracket_indexed(line: &str) -> bool {
    let Some(rest) = line.strip_prefix('[') else {
        return false;
    };
    let Some(close) = rest.find(']') else {
        return false;
    };
    close > 0
        && rest[..close].chars().all(|c| c.is_ascii_digit())
        && !rest[close + 1..].trim().is_empty()
}

fn strip_numbered_prefix(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix('.')
        .or_else(|| rest.strip_prefix(')'))
        .map(str::trim)
}

fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.to_string();
    }
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= 120 {
        return trimmed.to_string();
    }
    let mut end = 120;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
