// src/core/mod.rs — Session core: conversation, extraction, correction loop

pub mod conversation;
pub mod extractor;
pub mod feedback;
pub mod orchestrator;
pub mod system_prompt;
pub mod types;
