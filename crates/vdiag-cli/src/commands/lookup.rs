//! Lookup command - tiered knowledge lookup without dispatch

use anyhow::Result;
use vdiag_core::VehicleId;
use vdiag_engine::EngineConfig;
use vdiag_store::{Lookup, Tier};

use super::open_store;
use crate::output::{tier_label, OutputContext};

/// Show where a command resolves for a vehicle
///
/// Returns whether the command was found.
pub async fn lookup(
    config: &EngineConfig,
    vehicle: &VehicleId,
    command: &str,
    ctx: &OutputContext,
) -> Result<bool> {
    let store = open_store(config)?;
    let resolved = match store.lookup(vehicle, command).await? {
        Lookup::Found(resolved) => resolved,
        Lookup::Miss => {
            ctx.warn(&format!(
                "{} is unknown for {} in vehicle and reference rules; research required",
                command, vehicle
            ));
            return Ok(false);
        }
    };

    let classification = resolved.command.classification();
    let module = match &resolved.module {
        Some(m) => format!("{} @ {} ({}, {})", m.name, m.address_hex(), m.protocol, m.bus),
        None => format!("{} (not declared)", resolved.command.module()),
    };
    let version = match resolved.tier {
        Tier::Vehicle => store
            .record(vehicle)
            .await?
            .map(|r| r.version.to_string())
            .unwrap_or_else(|| "-".to_string()),
        Tier::Reference => "-".to_string(),
    };

    ctx.print_kv(&[
        ("Command", resolved.command.id().to_string()),
        ("Tier", resolved.tier.to_string()),
        ("Source", resolved.source.clone()),
        ("Version", version),
        ("Module", module),
        ("Request", hex::encode_upper(resolved.command.request_bytes())),
        ("Pattern", resolved.command.response().source().to_string()),
        ("Danger", tier_label(classification.level).to_string()),
        ("Reason", classification.reason.clone()),
    ]);
    Ok(true)
}
