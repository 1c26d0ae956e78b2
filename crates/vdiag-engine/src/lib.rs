//! vdiag-engine - confirmation, dispatch and orchestration
//!
//! This crate ties the rule language and the knowledge store to a vehicle
//! transport and an operator prompt.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                           │
//! │  intent → lookup → classify → confirm → dispatch → decode    │
//! │                                              └──→ learn      │
//! │                                                             │
//! │  ┌──────────────┐  ┌───────────────────┐  ┌───────────────┐ │
//! │  │KnowledgeStore│  │ConfirmationMachine│  │ResearchRequest│ │
//! │  │ (tiers)      │  │ (operator steps)  │  │ (mpsc, opt.)  │ │
//! │  └──────────────┘  └─────────┬─────────┘  └───────────────┘ │
//! │                          Confirmed                          │
//! │                        ┌─────┴─────┐                        │
//! │                        │Dispatcher │                        │
//! │                        │(ISO-TP)   │                        │
//! │                        └─────┬─────┘                        │
//! │                 ┌────────────┴────────────┐                 │
//! │                 │    TransportAdapter     │                 │
//! │                 │   (mock / replay / …)   │                 │
//! │                 └─────────────────────────┘                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`Dispatcher::dispatch`] takes a [`Confirmed`] token by value. Tokens are
//! only issued by a [`ConfirmationMachine`] that reached `Confirmed`, so
//! nothing reaches the transport without passing confirmation.

pub mod config;
pub mod confirm;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod transport;
pub mod uds;

pub use config::{EngineConfig, TimeoutConfig, TransportConfig};
pub use confirm::{
    CancelHandle, CancelToken, ConfirmationMachine, ConfirmationPrompt, ConfirmationRequest,
    ConfirmationState, Confirmed, Reply, ScriptedPrompt, RISK_PHRASE,
};
pub use dispatch::{Dispatcher, Exchange};
pub use error::{ConfigError, ConfirmationError, DispatchError};
pub use orchestrator::{
    LearnStatus, Orchestrator, Outcome, ResearchReason, ResearchRequest, ResearchStatus,
};
pub use transport::{create_transport, TransportAdapter, TransportError};
pub use uds::{NegativeResponseCode, NrcCategory};
