//! Learned procedures
//!
//! A procedure is a command that just completed a full round trip together
//! with the response pattern that matched. It is persisted as a block of rule
//! text preceded by a `# learned` marker line.

use chrono::{DateTime, SecondsFormat, Utc};
use vdiag_rules::{
    bit_mapping_line, command_line, dtc_line, module_line, response_line, BitMapping,
    CommandRule, DtcRule, ModuleDescriptor, Pattern, ResponseRule,
};

/// Marker that opens every learned block
pub const LEARNED_MARKER: &str = "# learned ";

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub command: CommandRule,
    /// Module descriptor to persist alongside the command, when the vehicle
    /// rules do not already declare it
    pub module: Option<ModuleDescriptor>,
    /// Field extraction that worked for this command
    pub response: Option<ResponseRule>,
    /// Trouble-code layouts and known codes, bound to the command
    pub dtc_rules: Vec<DtcRule>,
    /// Status flags read from the response
    pub bit_mappings: Vec<BitMapping>,
}

impl Procedure {
    pub fn new(command: CommandRule) -> Self {
        Self {
            command,
            module: None,
            response: None,
            dtc_rules: Vec::new(),
            bit_mappings: Vec::new(),
        }
    }

    pub fn with_module(mut self, module: ModuleDescriptor) -> Self {
        self.module = Some(module);
        self
    }

    pub fn with_response_rule(mut self, response: ResponseRule) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_dtc_rules(mut self, rules: impl IntoIterator<Item = DtcRule>) -> Self {
        self.dtc_rules.extend(rules);
        self
    }

    pub fn with_bit_mappings(mut self, mappings: impl IntoIterator<Item = BitMapping>) -> Self {
        self.bit_mappings.extend(mappings);
        self
    }

    /// Replace the response pattern with the one that actually matched
    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.command = self.command.with_response(pattern);
        self
    }

    pub fn command_id(&self) -> &str {
        self.command.id()
    }

    pub fn pattern(&self) -> &str {
        self.command.response().source()
    }

    /// Render the learned block, marker line first
    pub fn render(&self, learned_at: DateTime<Utc>) -> String {
        let mut lines = vec![format!(
            "{}{} {}",
            LEARNED_MARKER,
            learned_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.command.id()
        )];
        if let Some(module) = &self.module {
            lines.push(module_line(module));
        }
        lines.push(command_line(&self.command));
        if let Some(response) = &self.response {
            lines.push(response_line(response));
        }
        lines.extend(self.dtc_rules.iter().map(dtc_line));
        lines.extend(self.bit_mappings.iter().map(bit_mapping_line));
        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}

/// Number of learned blocks in persisted rule text
pub fn learned_blocks(text: &str) -> usize {
    text.lines()
        .filter(|line| line.trim_start().starts_with(LEARNED_MARKER))
        .count()
}
