//! Decode command - decode captured frames offline

use anyhow::{bail, Context, Result};
use std::path::Path;
use vdiag_rules::{decode_frames, parse_adapter_text};

use super::{load_rules, print_decoded};
use crate::output::OutputContext;

/// Decode hex frames against a rule file
///
/// Each argument is one frame; adapter text with `N:` indices and a length
/// line is accepted too, one argument per line.
pub fn decode(
    rules_path: &Path,
    command: &str,
    frames: &[String],
    ctx: &OutputContext,
) -> Result<()> {
    let rules = load_rules(rules_path)?;
    if rules.command(command).is_none() {
        bail!("{} is not declared in {}", command, rules_path.display());
    }

    let text = frames.join("\n");
    let frames = parse_adapter_text(&text).context("Invalid frame data")?;
    tracing::debug!(command, frames = frames.len(), "Decoding captured frames");

    let decoded = decode_frames(&rules, command, frames)
        .with_context(|| format!("Failed to decode response for {}", command))?;
    print_decoded(&decoded, ctx);
    Ok(())
}
