// Auto-labeling stage: prompts every input record against a generation
// backend and writes the structured result to the labeled dataset.
// All backend calls go through llm_client.

pub mod extractor;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod prompts;
pub mod sink;
