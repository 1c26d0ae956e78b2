//! Confirmation state machine
//!
//! ```text
//! Unclassified ─classify─► Classified ─┬─(SAFE)──────────────────────► Confirmed
//!                                      └─► AwaitingConfirmation{step} ─┬─► Confirmed
//!                                                                      ├─► Rejected
//!                                                                      └─► TimedOut
//! ```
//!
//! The only way to obtain a [`Confirmed`] token is to walk this machine to
//! its `Confirmed` state, and dispatch takes the token by value.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vdiag_core::DangerLevel;
use vdiag_rules::CommandRule;

use super::cancel::CancelToken;
use super::prompt::ConfirmationPrompt;
use super::request::ConfirmationRequest;
use crate::error::ConfirmationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConfirmationState {
    Unclassified,
    Classified,
    AwaitingConfirmation { step: usize },
    Confirmed,
    Rejected,
    TimedOut,
}

impl ConfirmationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConfirmationState::Confirmed | ConfirmationState::Rejected | ConfirmationState::TimedOut
        )
    }
}

impl fmt::Display for ConfirmationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationState::Unclassified => f.write_str("unclassified"),
            ConfirmationState::Classified => f.write_str("classified"),
            ConfirmationState::AwaitingConfirmation { step } => {
                write!(f, "awaiting_confirmation(step {})", step)
            }
            ConfirmationState::Confirmed => f.write_str("confirmed"),
            ConfirmationState::Rejected => f.write_str("rejected"),
            ConfirmationState::TimedOut => f.write_str("timed_out"),
        }
    }
}

/// Proof that a command passed its confirmation sequence
///
/// Issued only by [`ConfirmationMachine`]; it cannot be built anywhere else:
///
/// ```compile_fail
/// let token = vdiag_engine::Confirmed {
///     command: "HVAC.BLEND_DOOR_CONTROL".to_string(),
/// };
/// ```
#[derive(Debug, PartialEq, Eq)]
pub struct Confirmed {
    request_id: Uuid,
    command: String,
    level: DangerLevel,
    acknowledgements: usize,
}

impl Confirmed {
    fn issue(request: &ConfirmationRequest) -> Self {
        Self {
            request_id: request.id,
            command: request.command.clone(),
            level: request.level,
            acknowledgements: request.steps.len(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn level(&self) -> DangerLevel {
        self.level
    }

    /// Operator acknowledgements collected before issue
    pub fn acknowledgements(&self) -> usize {
        self.acknowledgements
    }
}

/// Walks one command from classification to a terminal state
#[derive(Debug)]
pub struct ConfirmationMachine {
    state: ConfirmationState,
    step_timeout: Duration,
    cancel: CancelToken,
    request: Option<ConfirmationRequest>,
    history: Vec<ConfirmationState>,
}

impl ConfirmationMachine {
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            state: ConfirmationState::Unclassified,
            step_timeout,
            cancel: CancelToken::never(),
            request: None,
            history: vec![ConfirmationState::Unclassified],
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> ConfirmationState {
        self.state
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[ConfirmationState] {
        &self.history
    }

    pub fn request(&self) -> Option<&ConfirmationRequest> {
        self.request.as_ref()
    }

    /// Attach the command's static classification
    pub fn classify(
        &mut self,
        rule: &CommandRule,
    ) -> Result<&ConfirmationRequest, ConfirmationError> {
        if self.state != ConfirmationState::Unclassified {
            return Err(ConfirmationError::InvalidState(format!(
                "classify from {}",
                self.state
            )));
        }
        let request = ConfirmationRequest::for_command(rule);
        info!(
            command = %request.command,
            tier = %request.level,
            reason = %request.reason,
            steps = request.steps.len(),
            "Command classified"
        );
        self.request = Some(request);
        self.transition(ConfirmationState::Classified);
        self.request
            .as_ref()
            .ok_or_else(|| ConfirmationError::InvalidState("request missing".to_string()))
    }

    /// Run the operator sequence
    ///
    /// SAFE commands are confirmed without asking. Every other tier asks each
    /// step in turn; a failed step, an expired wait or a cancellation ends the
    /// sequence and nothing is issued.
    pub async fn confirm(
        &mut self,
        prompt: &dyn ConfirmationPrompt,
    ) -> Result<Confirmed, ConfirmationError> {
        let request = match (&self.state, &self.request) {
            (ConfirmationState::Classified, Some(request)) => request.clone(),
            _ => {
                return Err(ConfirmationError::InvalidState(format!(
                    "confirm from {}",
                    self.state
                )))
            }
        };
        let command = request.command.clone();

        for step in &request.steps {
            self.transition(ConfirmationState::AwaitingConfirmation { step: step.number });

            let cancel = self.cancel.clone();
            let ask = tokio::time::timeout(self.step_timeout, prompt.ask(&request, step));
            let answer = tokio::select! {
                _ = cancel.cancelled() => None,
                reply = ask => Some(reply),
            };

            match answer {
                None => {
                    self.transition(ConfirmationState::Rejected);
                    return Err(ConfirmationError::Cancelled { command });
                }
                Some(Err(_)) => {
                    warn!(command = %command, step = step.number, "Confirmation timed out");
                    self.transition(ConfirmationState::TimedOut);
                    return Err(ConfirmationError::TimedOut {
                        command,
                        step: step.number,
                        timeout_ms: self.step_timeout.as_millis() as u64,
                    });
                }
                Some(Ok(reply)) if step.accepts(&reply) => {
                    debug!(command = %command, step = step.number, "Step acknowledged");
                }
                Some(Ok(_)) => {
                    self.transition(ConfirmationState::Rejected);
                    return Err(ConfirmationError::Declined {
                        command,
                        step: step.number,
                    });
                }
            }
        }

        self.transition(ConfirmationState::Confirmed);
        Ok(Confirmed::issue(&request))
    }

    /// Classify and confirm in one go
    pub async fn run(
        &mut self,
        rule: &CommandRule,
        prompt: &dyn ConfirmationPrompt,
    ) -> Result<Confirmed, ConfirmationError> {
        self.classify(rule)?;
        self.confirm(prompt).await
    }

    fn transition(&mut self, next: ConfirmationState) {
        let command = self.request.as_ref().map(|r| r.command.as_str()).unwrap_or("-");
        info!(command, from = %self.state, to = %next, "Confirmation state");
        self.state = next;
        self.history.push(next);
    }
}
