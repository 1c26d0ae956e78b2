//! Shared data models for vdiag crates

mod danger;
mod intent;
mod vehicle;

pub use danger::*;
pub use intent::*;
pub use vehicle::*;
