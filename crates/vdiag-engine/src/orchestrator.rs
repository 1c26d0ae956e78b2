//! Command orchestration
//!
//! One intent runs the whole loop: tiered lookup, classification,
//! confirmation, dispatch, decode, and learning. Every step ends in an
//! [`Outcome`] the caller can branch on; only a failed lookup (corrupted or
//! unreadable knowledge) is returned as an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use vdiag_core::{DangerLevel, DiagError, DiagResult, Intent, VehicleId};
use vdiag_rules::{decode, Decoded};
use vdiag_store::{AppendOutcome, KnowledgeStore, Lookup, Procedure, ResolvedCommand, Tier};

use crate::config::{EngineConfig, TimeoutConfig};
use crate::confirm::{CancelToken, ConfirmationMachine, ConfirmationPrompt};
use crate::dispatch::{Dispatcher, Exchange};
use crate::transport::{create_transport, TransportAdapter};

/// Why research was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchReason {
    /// Command absent from every tier, or its module is undeclared
    UnknownCommand,
    /// Response decoded but contained codes the rules do not know
    UnknownDtcs,
}

/// Work item for the external research collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResearchRequest {
    pub vehicle: VehicleId,
    pub command: String,
    pub reason: ResearchReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown_dtcs: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

impl ResearchRequest {
    /// One expected, non-fatal error per trouble code the rules do not know
    pub fn unknown_dtc_errors(&self) -> Vec<DiagError> {
        self.unknown_dtcs
            .iter()
            .cloned()
            .map(DiagError::UnknownDtc)
            .collect()
    }
}

/// Whether a research request reached the collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Queued,
    /// Channel full or closed; the request was not delivered
    Dropped,
    /// No research channel configured
    Disabled,
}

/// What happened to the learned procedure after a success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnStatus {
    Appended { version: u32 },
    Unchanged { version: u32 },
    /// The round trip succeeded but the store refused or could not write
    Failed(DiagError),
}

impl From<AppendOutcome> for LearnStatus {
    fn from(outcome: AppendOutcome) -> Self {
        match outcome {
            AppendOutcome::Appended { version } => LearnStatus::Appended { version },
            AppendOutcome::Unchanged { version } => LearnStatus::Unchanged { version },
        }
    }
}

/// Result of executing one intent
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Nothing to send; research was offered
    NotFound {
        command: String,
        reason: String,
        research: ResearchStatus,
    },
    /// Operator declined, timed out or cancelled; nothing was sent
    Rejected {
        command: String,
        level: DangerLevel,
        error: DiagError,
    },
    /// Sent but no usable response
    TransportError { command: String, error: DiagError },
    /// Complete response that the rules could not decode
    DecodeMismatch {
        command: String,
        exchange: Exchange,
        error: DiagError,
    },
    Success {
        decoded: Decoded,
        exchange: Exchange,
        tier: Tier,
        learned: LearnStatus,
        research: Option<ResearchStatus>,
    },
}

impl Outcome {
    pub fn command(&self) -> &str {
        match self {
            Outcome::NotFound { command, .. }
            | Outcome::Rejected { command, .. }
            | Outcome::TransportError { command, .. }
            | Outcome::DecodeMismatch { command, .. } => command,
            Outcome::Success { decoded, .. } => &decoded.command,
        }
    }

    /// Short label for logs and reports
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::NotFound { .. } => "not_found",
            Outcome::Rejected { .. } => "rejected",
            Outcome::TransportError { .. } => "transport_error",
            Outcome::DecodeMismatch { .. } => "decode_mismatch",
            Outcome::Success { .. } => "success",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Whether the command left the engine
    pub fn was_dispatched(&self) -> bool {
        matches!(
            self,
            Outcome::TransportError { .. }
                | Outcome::DecodeMismatch { .. }
                | Outcome::Success { .. }
        )
    }
}

/// Runs intents against a store, a transport and an operator prompt
pub struct Orchestrator {
    store: Arc<KnowledgeStore>,
    transport: Arc<dyn TransportAdapter>,
    prompt: Arc<dyn ConfirmationPrompt>,
    timeouts: TimeoutConfig,
    research: Option<mpsc::Sender<ResearchRequest>>,
    cancel: CancelToken,
    // Half-duplex bus: one command in flight at a time
    bus: AsyncMutex<()>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<KnowledgeStore>,
        transport: Arc<dyn TransportAdapter>,
        prompt: Arc<dyn ConfirmationPrompt>,
    ) -> Self {
        Self {
            store,
            transport,
            prompt,
            timeouts: TimeoutConfig::default(),
            research: None,
            cancel: CancelToken::never(),
            bus: AsyncMutex::new(()),
        }
    }

    /// Build store and transport from configuration
    pub async fn from_config(
        config: &EngineConfig,
        prompt: Arc<dyn ConfirmationPrompt>,
    ) -> DiagResult<Self> {
        config.validate()?;
        let mut store = KnowledgeStore::open(&config.knowledge_dir)?
            .with_lock_policy(config.store.lock_policy());
        for path in &config.reference_files {
            store = store.load_reference(path)?;
        }
        let transport = create_transport(&config.transport).await?;
        info!(
            knowledge_dir = %config.knowledge_dir.display(),
            references = config.reference_files.len(),
            transport = transport.kind(),
            "Orchestrator ready"
        );
        Ok(Self::new(Arc::new(store), transport, prompt).with_timeouts(config.timeouts))
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Offer research requests on a bounded channel
    pub fn with_research(mut self, sender: mpsc::Sender<ResearchRequest>) -> Self {
        self.research = Some(sender);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// Execute one intent end to end
    pub async fn execute(&self, intent: &Intent) -> DiagResult<Outcome> {
        let command = intent.command.as_str();
        // Cancellations from an earlier intent do not carry over
        let cancel = self.cancel.rearm();
        info!(vehicle = %intent.vehicle, command, "Executing intent");

        let resolved = match self.store.lookup(&intent.vehicle, command).await? {
            Lookup::Found(resolved) => resolved,
            Lookup::Miss => {
                let research =
                    self.request_research(intent, ResearchReason::UnknownCommand, Vec::new());
                return Ok(Outcome::NotFound {
                    command: command.to_string(),
                    reason: "command unknown in vehicle and reference rules".to_string(),
                    research,
                });
            }
        };
        let module = match resolved.module.clone() {
            Some(module) => module,
            None => {
                warn!(
                    command,
                    module = resolved.command.module(),
                    "Module not declared in any tier"
                );
                let research =
                    self.request_research(intent, ResearchReason::UnknownCommand, Vec::new());
                return Ok(Outcome::NotFound {
                    command: command.to_string(),
                    reason: format!("module {} is not declared", resolved.command.module()),
                    research,
                });
            }
        };

        let mut machine =
            ConfirmationMachine::new(self.timeouts.confirmation()).with_cancel(cancel.clone());
        let level = machine.classify(&resolved.command)?.level;
        let confirmed = match machine.confirm(self.prompt.as_ref()).await {
            Ok(confirmed) => confirmed,
            Err(err) => {
                info!(command, tier = %level, error = %err, "Command not executed");
                return Ok(Outcome::Rejected {
                    command: command.to_string(),
                    level,
                    error: err.into(),
                });
            }
        };

        let exchange = {
            let _bus = self.bus.lock().await;
            let dispatcher = Dispatcher::new(self.transport.clone(), &self.timeouts)
                .with_cancel(cancel);
            match dispatcher.dispatch(confirmed, &resolved.command, &module).await {
                Ok(exchange) => exchange,
                Err(err) => {
                    warn!(command, error = %err, "Dispatch failed");
                    return Ok(Outcome::TransportError {
                        command: command.to_string(),
                        error: err.into(),
                    });
                }
            }
        };

        let decoded = match decode(&resolved.rules, command, &exchange.payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(
                    command,
                    payload = %hex::encode_upper(&exchange.payload),
                    error = %err,
                    "Decode failed"
                );
                return Ok(Outcome::DecodeMismatch {
                    command: command.to_string(),
                    exchange,
                    error: err.into(),
                });
            }
        };

        let unknown: Vec<String> = decoded
            .unknown_dtcs()
            .iter()
            .map(|d| d.code.clone())
            .collect();
        let research = if unknown.is_empty() {
            None
        } else {
            Some(self.request_research(intent, ResearchReason::UnknownDtcs, unknown))
        };

        let learned = self.learn(&intent.vehicle, &resolved).await;
        info!(
            command,
            tier = %resolved.tier,
            dtcs = decoded.dtcs.len(),
            fields = decoded.fields.len(),
            "Command succeeded"
        );
        Ok(Outcome::Success {
            decoded,
            exchange,
            tier: resolved.tier,
            learned,
            research,
        })
    }

    /// Persist the procedure that just worked
    ///
    /// Reference hits carry their module and every rule that shapes the
    /// decode (field extraction, trouble-code layouts, status flags) into the
    /// vehicle file, so the next lookup answers from the vehicle tier with the
    /// same decoded output.
    async fn learn(&self, vehicle: &VehicleId, resolved: &ResolvedCommand) -> LearnStatus {
        let command = &resolved.command;
        let mut procedure = Procedure::new(command.clone());
        if resolved.tier == Tier::Reference {
            if let Some(module) = &resolved.module {
                procedure = procedure.with_module(module.clone());
            }
            if let Some(response) = resolved.rules.response_rule(command.id()) {
                procedure = procedure.with_response_rule(response.clone());
            }
            procedure = procedure
                .with_dtc_rules(resolved.rules.dtc_rules_for(command))
                .with_bit_mappings(resolved.rules.bit_mappings_for(command.id()).cloned());
        }

        match self.store.append(vehicle, &procedure).await {
            Ok(outcome) => outcome.into(),
            Err(err) => {
                let err = DiagError::from(err);
                warn!(
                    vehicle = %vehicle,
                    command = procedure.command_id(),
                    error = %err,
                    "Learning failed"
                );
                LearnStatus::Failed(err)
            }
        }
    }

    fn request_research(
        &self,
        intent: &Intent,
        reason: ResearchReason,
        unknown_dtcs: Vec<String>,
    ) -> ResearchStatus {
        let Some(sender) = &self.research else {
            debug!(command = %intent.command, "No research channel configured");
            return ResearchStatus::Disabled;
        };
        let request = ResearchRequest {
            vehicle: intent.vehicle.clone(),
            command: intent.command.clone(),
            reason,
            query: intent.query.clone(),
            unknown_dtcs,
            requested_at: Utc::now(),
        };
        match sender.try_send(request) {
            Ok(()) => {
                info!(command = %intent.command, ?reason, "Research requested");
                ResearchStatus::Queued
            }
            Err(err) => {
                warn!(command = %intent.command, error = %err, "Research request dropped");
                ResearchStatus::Dropped
            }
        }
    }
}
