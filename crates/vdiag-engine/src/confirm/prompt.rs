//! Confirmation boundary toward the UI

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::request::{ConfirmationRequest, ConfirmationStep, Reply, StepKind};

/// Asks the operator one step at a time
///
/// Implementations only collect answers; the state machine owns timeouts,
/// cancellation and the decision whether a reply passes.
#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    async fn ask(&self, request: &ConfirmationRequest, step: &ConfirmationStep) -> Reply;
}

/// Prompt that answers from a fixed script
///
/// Once the script runs out it never answers, which lets tests drive the
/// timeout path, unless it was built with [`ScriptedPrompt::accept_all`].
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    replies: Mutex<VecDeque<Reply>>,
    accept_rest: bool,
    asked: Mutex<Vec<usize>>,
}

impl ScriptedPrompt {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            accept_rest: false,
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Answers every step with the reply that passes it
    pub fn accept_all() -> Self {
        Self {
            accept_rest: true,
            ..Self::default()
        }
    }

    /// Step numbers asked so far
    pub fn asked(&self) -> Vec<usize> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl ConfirmationPrompt for ScriptedPrompt {
    async fn ask(&self, _request: &ConfirmationRequest, step: &ConfirmationStep) -> Reply {
        self.asked.lock().push(step.number);
        let next = self.replies.lock().pop_front();
        match next {
            Some(reply) => reply,
            None if self.accept_rest => passing_reply(step),
            None => std::future::pending().await,
        }
    }
}

fn passing_reply(step: &ConfirmationStep) -> Reply {
    match &step.kind {
        StepKind::TypedPhrase(text) | StepKind::FinalToken(text) => Reply::Typed(text.clone()),
        StepKind::YesNo | StepKind::Preconditions(_) => Reply::Accepted,
    }
}
