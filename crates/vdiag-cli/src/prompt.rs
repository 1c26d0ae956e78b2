//! Interactive terminal confirmation

use std::io::{BufRead, Write};

use async_trait::async_trait;
use colored::Colorize;
use tokio::sync::oneshot;
use vdiag_engine::confirm::{ConfirmationStep, StepKind};
use vdiag_engine::{ConfirmationPrompt, ConfirmationRequest, Reply};

use crate::output::tier_label;

/// Asks each confirmation step on stdin/stderr
///
/// Lines are read on a detached thread so an expired wait or a Ctrl-C does
/// not leave the runtime blocked on stdin at shutdown.
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn show_request(request: &ConfirmationRequest) {
        eprintln!();
        eprintln!("{} {}", tier_label(request.level), request.command.bold());
        eprintln!("Reason: {}", request.reason);
        if !request.risks.is_empty() {
            eprintln!("Risks:");
            for risk in &request.risks {
                eprintln!("  - {}", risk);
            }
        }
        eprintln!(
            "{} acknowledgement(s) required",
            request.required_acknowledgements()
        );
    }
}

#[async_trait]
impl ConfirmationPrompt for TerminalPrompt {
    async fn ask(&self, request: &ConfirmationRequest, step: &ConfirmationStep) -> Reply {
        if step.number == 1 {
            Self::show_request(request);
        }
        if let StepKind::Preconditions(preconditions) = &step.kind {
            eprintln!("Preconditions:");
            for precondition in preconditions {
                eprintln!("  - {}", precondition);
            }
        }
        eprint!(
            "[{}/{}] {} > ",
            step.number,
            request.required_acknowledgements(),
            step.prompt
        );
        let _ = std::io::stderr().flush();

        let (tx, rx) = oneshot::channel();
        std::thread::spawn(move || {
            let mut line = String::new();
            let read = std::io::stdin().lock().read_line(&mut line);
            let _ = tx.send(read.map(|_| line));
        });

        match rx.await {
            Ok(Ok(line)) => Reply::from_input(&line),
            // Closed stdin or a failed read never counts as consent
            _ => Reply::Declined,
        }
    }
}
