//! Completion Extractor — turns untrusted model output into a `LabelOutput`.
//!
//! Models frequently wrap the JSON object in prose or code fences. The
//! extractor takes the widest span from the first `{` to the last `}` and
//! parses it strictly. Anything that does not parse becomes
//! `LabelOutput::Raw` with the full trimmed text.
//!
//! Known imprecision: the greedy span also swallows trailing prose that
//! contains a `}`, which makes the parse fail and the record fall back to raw
//! output even when a valid object was present earlier in the text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::models::record::LabelOutput;

static JSON_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    // (?s): `.` crosses newlines so multi-line objects are captured whole.
    Regex::new(r"(?s)\{.*\}").expect("JSON span pattern is valid")
});

/// Never fails: returns the parsed object or the raw-text fallback.
pub fn extract(text: &str) -> LabelOutput {
    if let Some(span) = JSON_SPAN.find(text) {
        if let Ok(map) = serde_json::from_str::<Map<String, Value>>(span.as_str()) {
            return LabelOutput::Structured(map);
        }
    }

    LabelOutput::Raw {
        raw_output: text.trim().to_string(),
    }
}
