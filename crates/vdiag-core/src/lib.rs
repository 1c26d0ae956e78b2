//! vdiag-core - Shared vocabulary for the diagnostic command engine
//!
//! This crate holds the types every other vdiag crate agrees on: the error
//! taxonomy surfaced to callers, vehicle identities that key the knowledge
//! store, the four danger tiers, and the structured intent produced by the
//! (external) query parser.

pub mod error;
pub mod models;

pub use error::{DiagError, DiagResult};
pub use models::*;
