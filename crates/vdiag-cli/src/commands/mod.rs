//! Command implementations for vdiag

pub mod check;
pub mod classify;
pub mod decode;
pub mod lookup;
pub mod run;

pub use check::check;
pub use classify::classify;
pub use decode::decode;
pub use lookup::lookup;
pub use run::run;

use anyhow::{Context, Result};
use std::path::Path;
use vdiag_engine::EngineConfig;
use vdiag_rules::{Decoded, FlagValue, RuleSet};
use vdiag_store::KnowledgeStore;

use crate::output::{DtcRow, FieldRow, FlagRow, OutputContext, OutputFormat};

/// Read and compile a rule file
fn load_rules(path: &Path) -> Result<RuleSet> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rule file: {}", path.display()))?;
    RuleSet::parse(&text).with_context(|| format!("Invalid rule file: {}", path.display()))
}

/// Open the knowledge store with the configured references
fn open_store(config: &EngineConfig) -> Result<KnowledgeStore> {
    let mut store = KnowledgeStore::open(&config.knowledge_dir).with_context(|| {
        format!(
            "Failed to open knowledge store: {}",
            config.knowledge_dir.display()
        )
    })?;
    store = store.with_lock_policy(config.store.lock_policy());
    for path in &config.reference_files {
        store = store
            .load_reference(path)
            .with_context(|| format!("Failed to load reference rules: {}", path.display()))?;
    }
    Ok(store)
}

/// Print a decoded response: JSON as is, tables per section otherwise
fn print_decoded(decoded: &Decoded, ctx: &OutputContext) {
    if ctx.format == OutputFormat::Json {
        ctx.print_json(decoded);
        return;
    }

    ctx.info(&format!("{} → {}", decoded.command, decoded.payload));
    if !decoded.fields.is_empty() {
        let rows: Vec<FieldRow> = decoded
            .fields
            .iter()
            .map(|(name, field)| FieldRow {
                name: name.clone(),
                value: field.value.to_string(),
                unit: field.unit.clone().unwrap_or_default(),
                raw: field.raw.clone(),
            })
            .collect();
        ctx.print(&rows);
    }
    if !decoded.dtcs.is_empty() {
        let rows: Vec<DtcRow> = decoded
            .dtcs
            .iter()
            .map(|dtc| DtcRow {
                code: dtc.code.clone(),
                raw: dtc.raw.clone(),
                status: dtc
                    .status
                    .map(|s| format!("0x{:02X}", s))
                    .unwrap_or_else(|| "-".to_string()),
                known: if dtc.known { "Yes" } else { "No" }.to_string(),
            })
            .collect();
        ctx.print(&rows);
    }
    if !decoded.flags.is_empty() {
        let rows: Vec<FlagRow> = decoded
            .flags
            .iter()
            .map(|(name, flag)| FlagRow {
                name: name.clone(),
                value: match flag {
                    FlagValue::Bool(b) => b.to_string(),
                    FlagValue::Enum {
                        value,
                        label: Some(label),
                    } => format!("{} ({})", label, value),
                    FlagValue::Enum { value, label: None } => value.to_string(),
                },
            })
            .collect();
        ctx.print(&rows);
    }
    if decoded.fields.is_empty() && decoded.dtcs.is_empty() && decoded.flags.is_empty() {
        ctx.info("Response matched; nothing to extract");
    }
}
