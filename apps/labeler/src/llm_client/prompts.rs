// Shared prompt fragments.
// Each feature that needs LLM calls defines its own prompts.rs alongside it;
// this file holds the cross-cutting pieces.

/// Output rules appended to every prompt that expects a JSON object back.
/// Models otherwise wrap the JSON in prose that has to be stripped later.
pub const JSON_ONLY_RULES: &str = "\
OUTPUT RULES:
- Output ONLY valid minified JSON
- No explanations
- No extra text";
