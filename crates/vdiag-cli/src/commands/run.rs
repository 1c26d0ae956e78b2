//! Run command - full orchestration with operator confirmation

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use vdiag_core::{DiagError, Intent};
use vdiag_engine::{
    CancelToken, EngineConfig, LearnStatus, Orchestrator, Outcome, ResearchReason,
    ResearchRequest, ResearchStatus,
};

use super::print_decoded;
use crate::output::{OutputContext, OutputFormat};
use crate::prompt::TerminalPrompt;

/// Research requests buffered for this invocation
const RESEARCH_QUEUE: usize = 8;

/// Execute one intent; returns whether it succeeded
pub async fn run(config: &EngineConfig, intent: Intent, ctx: &OutputContext) -> Result<bool> {
    // First Ctrl+C cancels the pending step, a second one exits
    let (handle, cancel) = CancelToken::new();
    let pressed = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if pressed.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        handle.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let (research_tx, mut research_rx) = mpsc::channel(RESEARCH_QUEUE);
    let orchestrator = Orchestrator::from_config(config, Arc::new(TerminalPrompt))
        .await
        .context("Failed to start engine")?
        .with_research(research_tx)
        .with_cancel(cancel);

    let outcome = orchestrator
        .execute(&intent)
        .await
        .with_context(|| format!("Knowledge for {} is unusable", intent.vehicle))?;
    tracing::debug!(outcome = outcome.label(), "Intent finished");

    let succeeded = report(&outcome, ctx);
    while let Ok(request) = research_rx.try_recv() {
        report_research(&request, ctx);
    }
    Ok(succeeded)
}

fn report(outcome: &Outcome, ctx: &OutputContext) -> bool {
    match outcome {
        Outcome::Success {
            decoded,
            exchange,
            tier,
            learned,
            research,
        } => {
            print_decoded(decoded, ctx);
            ctx.info(&format!(
                "Answered from {} rules in {} frame(s)",
                tier, exchange.frames
            ));
            match learned {
                LearnStatus::Appended { version } => ctx.success(&format!(
                    "Learned {} into vehicle rules (version {})",
                    decoded.command, version
                )),
                LearnStatus::Unchanged { version } => {
                    ctx.info(&format!("Already known (version {})", version))
                }
                LearnStatus::Failed(err) => ctx.warn(&format!("Not learned: {}", err)),
            }
            if *research == Some(ResearchStatus::Dropped) {
                ctx.warn("Unknown trouble codes could not be queued for research");
            }
            true
        }
        Outcome::NotFound {
            command,
            reason,
            research,
        } => {
            ctx.warn(&format!("{} not executed: {}", command, reason));
            match research {
                ResearchStatus::Queued => ctx.info("Research requested"),
                ResearchStatus::Dropped => ctx.warn("Research queue unavailable"),
                ResearchStatus::Disabled => {}
            }
            false
        }
        Outcome::Rejected {
            command,
            level,
            error,
        } => {
            let why = match error {
                DiagError::ConfirmationDeclined(_) => "operator declined".to_string(),
                DiagError::ConfirmationTimedOut(_) => "no answer in time".to_string(),
                DiagError::Cancelled => "cancelled by operator".to_string(),
                other => other.to_string(),
            };
            ctx.error(&format!("{} [{}] not executed: {}", command, level, why));
            false
        }
        Outcome::TransportError { command, error } => {
            ctx.error(&format!("{} failed: {}", command, error));
            if error.is_retryable_nack() {
                ctx.warn(
                    "The module refused the request; \
                     another session or security level may be needed",
                );
            }
            false
        }
        Outcome::DecodeMismatch {
            command,
            exchange,
            error,
        } => {
            ctx.error(&format!(
                "{}: response {} not decoded: {}",
                command,
                hex::encode_upper(&exchange.payload),
                error
            ));
            false
        }
    }
}

fn report_research(request: &ResearchRequest, ctx: &OutputContext) {
    if ctx.format == OutputFormat::Json {
        ctx.print_json(request);
        return;
    }
    match request.reason {
        ResearchReason::UnknownCommand => ctx.info(&format!(
            "Research queued: how to run {} on {}",
            request.command, request.vehicle
        )),
        ResearchReason::UnknownDtcs => {
            for err in request.unknown_dtc_errors() {
                ctx.warn(&err.to_string());
            }
            ctx.info(&format!(
                "Research queued: meaning of {} on {}",
                request.unknown_dtcs.join(", "),
                request.vehicle
            ));
        }
    }
}
