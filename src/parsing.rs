//! Defensive extraction of JSON from messy model output.
//!
//! Models frequently wrap JSON in markdown fences or surround it with prose.
//! These utilities strip fences, locate embedded objects/arrays, and coerce
//! the text into a typed value. They are what makes the gateway's typed
//! contract reliable enough for structured pipelines.

use crate::error::Result;
use crate::PipelineError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Extract JSON content from markdown fenced code blocks.
///
/// Recognizes `` ```json ``, `` ```JSON ``, and plain `` ``` `` fences.
pub fn extract_json_block(text: &str) -> Option<String> {
    let markers = ["```json", "```JSON", "```"];
    for marker in markers {
        if let Some(start) = text.find(marker) {
            let content_start = start + marker.len();
            if let Some(end) = text[content_start..].find("```") {
                return Some(text[content_start..content_start + end].trim().to_string());
            }
        }
    }
    None
}

/// Try to locate and extract a JSON object or array from text that may
/// contain surrounding prose.
///
/// Tries, in order:
/// 1. Markdown code block extraction
/// 2. First `{` or `[` with matching closer
pub fn extract_json_candidate(text: &str) -> Option<String> {
    let trimmed = text.trim();

    if let Some(block) = extract_json_block(trimmed) {
        return Some(block);
    }

    if let Some(idx) = trimmed.find('{').or_else(|| trimmed.find('[')) {
        let candidate = &trimmed[idx..];
        if serde_json::from_str::<Value>(candidate).is_ok() {
            return Some(candidate.to_string());
        }
        let open = candidate.as_bytes()[0];
        let close = if open == b'{' { '}' } else { ']' };
        if let Some(end) = candidate.rfind(close) {
            let substr = &candidate[..=end];
            if serde_json::from_str::<Value>(substr).is_ok() {
                return Some(substr.to_string());
            }
        }
    }

    None
}

/// Parse text into a `serde_json::Value`, requiring valid JSON somewhere
/// in the input.
pub fn parse_value(text: &str) -> Result<Value> {
    let trimmed = text.trim();

    if let Ok(val) = serde_json::from_str::<Value>(trimmed) {
        return Ok(val);
    }

    if let Some(candidate) = extract_json_candidate(trimmed) {
        if let Ok(val) = serde_json::from_str::<Value>(&candidate) {
            return Ok(val);
        }
    }

    Err(PipelineError::MalformedOutput(format!(
        "no valid JSON found in model output (truncated): {}",
        &trimmed[..trimmed.len().min(200)]
    )))
}

/// Parse text into a typed `T` with defensive JSON extraction.
///
/// Tries direct parse, markdown fence extraction, and embedded-JSON
/// detection before giving up with a malformed-output error. A value that
/// parses as JSON but does not match the target schema is also malformed:
/// the retry loop can then re-ask the model with temperature 0.
pub fn parse_typed<T: DeserializeOwned>(text: &str) -> Result<T> {
    let value = parse_value(text)?;
    serde_json::from_value(value).map_err(|e| {
        PipelineError::MalformedOutput(format!("output did not match declared schema: {}", e))
    })
}
