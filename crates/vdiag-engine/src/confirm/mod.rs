//! Operator confirmation
//!
//! Every command above SAFE is shown with its tier and reason, then walked
//! through the tier's acknowledgement steps:
//!
//! | Tier    | Steps                                                        |
//! |---------|--------------------------------------------------------------|
//! | SAFE    | none                                                         |
//! | CAUTION | one yes/no                                                   |
//! | WARNING | typed `I UNDERSTAND THE RISKS`                               |
//! | DANGER  | typed risk phrase, precondition check, `EXECUTE <command-id>` |

mod cancel;
mod machine;
mod prompt;
mod request;

pub use cancel::{CancelHandle, CancelToken};
pub use machine::{ConfirmationMachine, ConfirmationState, Confirmed};
pub use prompt::{ConfirmationPrompt, ScriptedPrompt};
pub use request::{
    final_token, ConfirmationRequest, ConfirmationStep, Reply, StepKind, DANGER_PRECONDITIONS,
    RISK_PHRASE,
};
