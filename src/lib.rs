//! Technician Ledger
//!
//! Records and queries a technician's income and expenses from free-form
//! utterances:
//! - Classifies utterances as business, general or personal
//! - Parses business utterances into structured commands via a language model
//! - Applies commands to a SQLite ledger with bounded retry on contention
//! - Turns query results back into natural language
//!
//! PIPELINE:
//! UTTERANCE → CLASSIFY → PARSE → DISPATCH → STORE → (query) FORMULATE → REPLY

pub mod api;
pub mod classifier;
pub mod command;
pub mod config;
pub mod conversational;
pub mod error;
pub mod formulator;
pub mod gemini;
pub mod model;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod report;
pub mod session;
pub mod store;
pub mod worker;

pub use error::{LedgerError, Result};

// Re-export common types
pub use command::Command;
pub use config::Config;
pub use models::*;
pub use orchestrator::{Orchestrator, Reply};
pub use store::{LedgerStore, SqliteLedger};
