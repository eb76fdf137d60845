use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The five keys a successfully labeled resume carries.
pub const OUTPUT_SCHEMA_KEYS: [&str; 5] = [
    "grammar",
    "skills",
    "experience",
    "projects",
    "overall_summary",
];

/// One line of the input JSONL. Only `input` is required; every other field
/// is carried through to the labeled record untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRecord {
    pub input: String,
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

impl InputRecord {
    /// Parses one JSONL line. Any `output` placeholder left by the prompt
    /// generation step is dropped here so it can never be merged with a label.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        let mut record: InputRecord = serde_json::from_str(line)?;
        record.passthrough.remove("output");
        Ok(record)
    }
}

/// Parsed completion, or the raw text when no JSON object could be recovered.
/// Exactly one of the two shapes is ever emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelOutput {
    Structured(Map<String, Value>),
    Raw { raw_output: String },
}

impl LabelOutput {
    pub fn is_structured(&self) -> bool {
        matches!(self, LabelOutput::Structured(_))
    }

    /// True when the structured mapping has exactly the expected key set.
    /// Informational only; key enforcement happens during normalization.
    pub fn matches_schema(&self) -> bool {
        match self {
            LabelOutput::Structured(map) => {
                map.len() == OUTPUT_SCHEMA_KEYS.len()
                    && OUTPUT_SCHEMA_KEYS.iter().all(|k| map.contains_key(*k))
            }
            LabelOutput::Raw { .. } => false,
        }
    }
}

/// An input record plus its label. Built once per successful task and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledRecord {
    pub input: String,
    pub output: LabelOutput,
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

impl LabeledRecord {
    pub fn new(record: InputRecord, output: LabelOutput) -> Self {
        Self {
            input: record.input,
            output,
            passthrough: record.passthrough,
        }
    }
}
