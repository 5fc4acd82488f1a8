//! convoq-core - Core types and traits for the conversation engine
//!
//! This crate provides the foundational types, traits, and error handling
//! used throughout the convoq system.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{ConvoqError, Result};
pub use traits::*;
pub use types::*;
