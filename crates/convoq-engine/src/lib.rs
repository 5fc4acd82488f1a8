//! convoq-engine - ingestion pipeline and conversational turn handling
//!
//! Ties the lower layers together: documents flow through parse, chunk,
//! embed, and index; incoming messages flow through memory, retrieval,
//! prompt composition, generation, and workflow evaluation. Each chat's
//! turns are serialized; everything across chats runs in parallel.

mod compose;
mod engine;
mod generate;

pub use compose::compose_prompt;
pub use engine::{Engine, StepSpec, TurnOutcome};
pub use generate::{HttpGenerator, MockGenerator};
