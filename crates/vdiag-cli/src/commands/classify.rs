//! Classify command - show a command's tier and confirmation steps

use anyhow::{Context, Result};
use std::path::Path;
use vdiag_engine::ConfirmationRequest;

use super::load_rules;
use crate::output::{tier_label, OutputContext, OutputFormat, StepRow};

/// Print tier, reason and the steps the operator would be asked
pub fn classify(rules_path: &Path, command: &str, ctx: &OutputContext) -> Result<()> {
    let rules = load_rules(rules_path)?;
    let rule = rules
        .command(command)
        .with_context(|| format!("{} is not declared in {}", command, rules_path.display()))?;
    let request = ConfirmationRequest::for_command(rule);

    if ctx.format == OutputFormat::Json {
        ctx.print_json(&request);
        return Ok(());
    }

    ctx.print_kv(&[
        ("Command", request.command.clone()),
        ("Tier", tier_label(request.level).to_string()),
        ("Reason", request.reason.clone()),
        (
            "Acknowledgements",
            request.required_acknowledgements().to_string(),
        ),
    ]);
    if !request.risks.is_empty() {
        ctx.info("Risks:");
        for risk in &request.risks {
            ctx.info(&format!("  - {}", risk));
        }
    }
    if !request.preconditions.is_empty() {
        ctx.info("Preconditions:");
        for precondition in &request.preconditions {
            ctx.info(&format!("  - {}", precondition));
        }
    }

    let steps: Vec<StepRow> = request
        .steps
        .iter()
        .map(|s| StepRow {
            number: s.number,
            prompt: s.prompt.clone(),
        })
        .collect();
    if steps.is_empty() {
        ctx.info("Runs without confirmation");
    } else {
        ctx.print(&steps);
    }
    Ok(())
}
