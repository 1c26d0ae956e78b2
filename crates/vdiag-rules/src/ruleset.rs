//! Compiled rule set
//!
//! Rules are kept in declaration order for history and serialization. Lookups
//! go through identifier indexes that always point at the latest declaration,
//! so a later `M:`/`C:`/`R:` line shadows an earlier one without removing it.

use std::collections::HashMap;
use std::str::FromStr;

use crate::dtc::{is_dtc_service, DtcLayout};
use crate::error::GrammarError;
use crate::grammar;
use crate::types::{BitMapping, CommandRule, DtcRule, ModuleDescriptor, ResponseRule};

/// One line of compiled rule text, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    Module(usize),
    Command(usize),
    Response(usize),
    Dtc(usize),
    BitMap(usize),
}

/// Rule counts, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleCounts {
    pub modules: usize,
    pub commands: usize,
    pub responses: usize,
    pub dtcs: usize,
    pub bit_mappings: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    modules: Vec<ModuleDescriptor>,
    commands: Vec<CommandRule>,
    responses: Vec<ResponseRule>,
    dtcs: Vec<DtcRule>,
    bit_mappings: Vec<BitMapping>,
    entries: Vec<Entry>,
    module_index: HashMap<String, usize>,
    command_index: HashMap<String, usize>,
    response_index: HashMap<String, usize>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile rule text
    pub fn parse(text: &str) -> Result<Self, GrammarError> {
        grammar::parse(text)
    }

    /// Canonical rule text; parsing it yields an equal rule set
    pub fn to_text(&self) -> String {
        grammar::to_text(self)
    }

    pub(crate) fn push_module(&mut self, module: ModuleDescriptor) {
        let idx = self.modules.len();
        self.module_index.insert(module.name.clone(), idx);
        self.modules.push(module);
        self.entries.push(Entry::Module(idx));
    }

    pub(crate) fn push_command(&mut self, command: CommandRule) {
        let idx = self.commands.len();
        self.command_index.insert(command.id().to_string(), idx);
        self.commands.push(command);
        self.entries.push(Entry::Command(idx));
    }

    pub(crate) fn push_response(&mut self, response: ResponseRule) {
        let idx = self.responses.len();
        self.response_index.insert(response.command.clone(), idx);
        self.responses.push(response);
        self.entries.push(Entry::Response(idx));
    }

    pub(crate) fn push_dtc(&mut self, dtc: DtcRule) {
        let idx = self.dtcs.len();
        self.dtcs.push(dtc);
        self.entries.push(Entry::Dtc(idx));
    }

    pub(crate) fn push_bit_mapping(&mut self, mapping: BitMapping) {
        let idx = self.bit_mappings.len();
        self.bit_mappings.push(mapping);
        self.entries.push(Entry::BitMap(idx));
    }

    pub(crate) fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of declarations of each kind, shadowed ones included
    pub fn counts(&self) -> RuleCounts {
        RuleCounts {
            modules: self.modules.len(),
            commands: self.commands.len(),
            responses: self.responses.len(),
            dtcs: self.dtcs.len(),
            bit_mappings: self.bit_mappings.len(),
        }
    }

    /// Effective module by name
    pub fn module(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.module_index.get(name).map(|&idx| &self.modules[idx])
    }

    /// Effective command by identifier
    pub fn command(&self, id: &str) -> Option<&CommandRule> {
        self.command_index.get(id).map(|&idx| &self.commands[idx])
    }

    /// Effective response rule for a command
    pub fn response_rule(&self, command: &str) -> Option<&ResponseRule> {
        self.response_index.get(command).map(|&idx| &self.responses[idx])
    }

    /// All module declarations, shadowed ones included
    pub fn all_modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    /// All command declarations, shadowed ones included
    pub fn all_commands(&self) -> &[CommandRule] {
        &self.commands
    }

    pub fn responses(&self) -> &[ResponseRule] {
        &self.responses
    }

    pub fn dtc_rules(&self) -> &[DtcRule] {
        &self.dtcs
    }

    pub fn bit_mappings(&self) -> &[BitMapping] {
        &self.bit_mappings
    }

    /// Effective modules in declaration order
    pub fn modules(&self) -> impl Iterator<Item = &ModuleDescriptor> + '_ {
        self.modules
            .iter()
            .enumerate()
            .filter(|(idx, m)| self.module_index.get(&m.name) == Some(idx))
            .map(|(_, m)| m)
    }

    /// Effective commands in declaration order
    pub fn commands(&self) -> impl Iterator<Item = &CommandRule> + '_ {
        self.commands
            .iter()
            .enumerate()
            .filter(|(idx, c)| self.command_index.get(c.id()) == Some(idx))
            .map(|(_, c)| c)
    }

    /// Record layout for a command's positive response
    ///
    /// A layout bound to the command wins over a global one; global layouts
    /// only apply to trouble-code services; the protocol default comes last.
    pub fn dtc_layout(&self, command: &CommandRule, payload: &[u8]) -> Option<DtcLayout> {
        let bound = self
            .dtcs
            .iter()
            .rev()
            .find(|d| d.command.as_deref() == Some(command.id()));
        if let Some(rule) = bound {
            return Some(DtcLayout::from_rule(rule));
        }
        if !is_dtc_service(command.service()) {
            return None;
        }
        self.dtcs
            .iter()
            .rev()
            .find(|d| d.command.is_none())
            .map(DtcLayout::from_rule)
            .or_else(|| DtcLayout::default_for(command.service(), payload))
    }

    /// Whether a decoded code is recognized for this command
    pub fn is_known_dtc(&self, command: &str, code: &str) -> bool {
        self.dtcs.iter().any(|d| {
            !d.is_layout_only()
                && d.code.eq_ignore_ascii_case(code)
                && d.command.as_deref().map_or(true, |c| c == command)
        })
    }

    /// Trouble-code rules that decide how this command's responses decode,
    /// each bound to the command explicitly
    ///
    /// Global rules only count for trouble-code services and come first, so
    /// that appended after other rules the set resolves to the same layout
    /// and the same known codes as it does here.
    pub fn dtc_rules_for(&self, command: &CommandRule) -> Vec<DtcRule> {
        let global = self
            .dtcs
            .iter()
            .filter(|d| d.command.is_none() && is_dtc_service(command.service()));
        let bound = self
            .dtcs
            .iter()
            .filter(|d| d.command.as_deref() == Some(command.id()));
        global
            .chain(bound)
            .map(|d| DtcRule {
                command: Some(command.id().to_string()),
                ..d.clone()
            })
            .collect()
    }

    pub fn bit_mappings_for<'a>(
        &'a self,
        command: &'a str,
    ) -> impl Iterator<Item = &'a BitMapping> + 'a {
        self.bit_mappings.iter().filter(move |m| m.command == command)
    }
}

impl FromStr for RuleSet {
    type Err = GrammarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleSet::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdiag_core::DangerLevel;

    const RULES: &str = "\
M:HVAC A:7A0 P:CAN B:HS
C:HVAC.READ_DTC M:03 R:43[0-9A-F]{4,}
DTC:B1632 B:1-2 BITS:0-15 CALC:SAE
C:HVAC.BLEND_DOOR_CONTROL M:2F PID:0101 D:0300 R:6F0101
M:HVAC A:7A8 P:CAN B:MS
C:HVAC.READ_DTC M:03 R:43[0-9A-F]{2,}
";

    #[test]
    fn test_shadowing_keeps_history() {
        let rules: RuleSet = RULES.parse().unwrap();
        assert_eq!(rules.module("HVAC").unwrap().address, 0x7A8);
        assert_eq!(
            rules.command("HVAC.READ_DTC").unwrap().response().source(),
            "43[0-9A-F]{2,}"
        );
        assert_eq!(rules.all_commands().len(), 3);
        assert_eq!(rules.commands().count(), 2);
        assert_eq!(rules.modules().count(), 1);
        assert_eq!(rules.counts().modules, 2);
    }

    #[test]
    fn test_dtc_binding_and_known_codes() {
        let rules: RuleSet = RULES.parse().unwrap();
        assert!(rules.is_known_dtc("HVAC.READ_DTC", "B1632"));
        assert!(!rules.is_known_dtc("HVAC.READ_DTC", "P0101"));
        assert!(!rules.is_known_dtc("HVAC.BLEND_DOOR_CONTROL", "B1632"));

        let door = rules.command("HVAC.BLEND_DOOR_CONTROL").unwrap();
        assert_eq!(door.danger(), DangerLevel::Warning);
        assert!(rules.dtc_layout(door, &[0x6F, 0x01, 0x01]).is_none());
    }

    #[test]
    fn test_dtc_rules_for_binds_globals_first() {
        let rules: RuleSet = "\
DTC:* B:1-2 BITS:0-15 CALC:HEX
C:ECM.READ_DTC M:03 R:43
DTC:P0420 B:1-2 BITS:0-15 CALC:SAE
C:ECM.READ_RPM M:01 PID:0C R:410C
"
        .parse()
        .unwrap();

        let read_dtc = rules.command("ECM.READ_DTC").unwrap();
        let bound = rules.dtc_rules_for(read_dtc);
        assert_eq!(bound.len(), 2);
        assert!(bound
            .iter()
            .all(|d| d.command.as_deref() == Some("ECM.READ_DTC")));
        assert_eq!(bound[0].code, "*");
        assert_eq!(bound[1].code, "P0420");

        // Global layouts never apply to non trouble-code services
        let rpm = rules.command("ECM.READ_RPM").unwrap();
        assert!(rules.dtc_rules_for(rpm).is_empty());
    }

    #[test]
    fn test_empty() {
        let rules = RuleSet::new();
        assert!(rules.is_empty());
        assert!(rules.command("X.Y").is_none());
    }
}
