// Prompt constants for the labeling stage.
// Reuses the cross-cutting JSON rules from llm_client::prompts.

use crate::llm_client::prompts::JSON_ONLY_RULES;

/// Labeling prompt template.
/// Replace: {resume_text}, {json_rules}
pub const LABEL_PROMPT_TEMPLATE: &str = r#"{resume_text}

TASK:
Extract resume information.

{json_rules}

JSON SCHEMA:
{
  "grammar": "good|average|poor",
  "skills": [],
  "experience": [],
  "projects": [],
  "overall_summary": ""
}"#;

/// Renders the labeling prompt for one record. The record text is embedded
/// verbatim; an empty text still yields the full instruction block.
pub fn build_prompt(resume_text: &str) -> String {
    // Rules go in first so a resume containing "{json_rules}" is left alone.
    LABEL_PROMPT_TEMPLATE
        .replace("{json_rules}", JSON_ONLY_RULES)
        .replacen("{resume_text}", resume_text, 1)
}
