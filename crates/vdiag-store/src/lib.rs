//! vdiag-store - Per-vehicle knowledge store
//!
//! Consulted before any command is issued and appended to after a previously
//! unknown procedure completes a successful round trip.
//!
//! # Layout
//!
//! ```text
//! <knowledge_dir>/
//!   ford_focus_2015.vdr      # vehicle rules, grammar text
//!   land%20rover_defender_2019.vdr
//! ```
//!
//! Each file starts with a `# vdiag rules v1 <make> <model> <year>` header.
//! Learned blocks start with `# learned <timestamp> <command-id>`; a record's
//! version is one plus the number of learned blocks.

pub mod error;
pub mod procedure;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use procedure::{learned_blocks, Procedure, LEARNED_MARKER};
pub use store::{
    header_line, AppendOutcome, KnowledgeRecord, KnowledgeStore, LockPolicy, Lookup,
    ResolvedCommand, Tier, RULE_FILE_EXTENSION,
};
