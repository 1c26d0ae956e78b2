//! Check command - compile a rule file and list what it declares

use anyhow::Result;
use std::path::Path;

use super::load_rules;
use crate::output::{CommandRow, ModuleRow, OutputContext};

/// Parse a rule file and print its modules and commands
pub fn check(path: &Path, ctx: &OutputContext) -> Result<()> {
    let rules = load_rules(path)?;
    let counts = rules.counts();
    ctx.success(&format!(
        "{}: {} module(s), {} command(s), {} response rule(s), {} DTC rule(s), {} bit mapping(s)",
        path.display(),
        counts.modules,
        counts.commands,
        counts.responses,
        counts.dtcs,
        counts.bit_mappings
    ));

    let modules: Vec<ModuleRow> = rules
        .modules()
        .map(|m| ModuleRow {
            name: m.name.clone(),
            address: m.address_hex(),
            protocol: m.protocol.to_string(),
            bus: m.bus.to_string(),
        })
        .collect();
    if !modules.is_empty() {
        ctx.print(&modules);
    }

    let commands: Vec<CommandRow> = rules
        .commands()
        .map(|c| {
            let classification = c.classification();
            CommandRow {
                id: c.id().to_string(),
                request: hex::encode_upper(c.request_bytes()),
                pattern: c.response().source().to_string(),
                tier: classification.level.to_string(),
                reason: classification.reason.clone(),
            }
        })
        .collect();
    ctx.print(&commands);

    let orphans: Vec<&str> = rules
        .commands()
        .filter(|c| rules.module(c.module()).is_none())
        .map(|c| c.id())
        .collect();
    if !orphans.is_empty() {
        ctx.warn(&format!(
            "No module declared here for: {} (resolved from other tiers at run time)",
            orphans.join(", ")
        ));
    }
    Ok(())
}
