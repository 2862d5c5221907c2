//! Call preparation pipeline.
//!
//! - signals: meeting record → comparable signals
//! - resolver: confidence-scored account/contact matching
//! - methodology: call context classification and framework weights
//! - history: prior calls for an account or contact
//! - tools: tool registry and the bounded generation loop
//! - prompts: generation prompts
//! - sheet: tiered prep-sheet builder
//! - orchestrate: sequencing, persistence and the emergency fallback

pub mod constants;
pub mod history;
pub mod methodology;
pub mod orchestrate;
pub mod prompts;
pub mod resolver;
pub mod sheet;
pub mod signals;
pub mod tools;

#[cfg(test)]
pub mod testing;

pub use methodology::compute_methodology_weights;
pub use orchestrate::{generate_prep_sheet, GenerationMode, GenerationResult, MeetingRef, PrepRequest};
pub use resolver::resolve;
