//! Rule text parser and serializer
//!
//! Line-oriented, one directive per line, single pass:
//!
//! ```text
//! M:<module> A:<hex-address> P:<protocol> B:<bus-class>
//! C:<module>.<action> M:<hex-mode> [PID:<hex>] [D:<hex-bytes>] R:<pattern> [LVL:<tier>]
//! DTC:<code> B:<byte-range> BITS:<bit-range> CALC:<formula-tag> [STRIDE:<n>] [CMD:<command-id>]
//! R:<command-id> PATTERN:<pattern> EXTRACT:<field-names> [CALC:<formulas>] [UNIT:<units>]
//! BM:<field> BYTE:<pos> BIT:<range> [MEANING:<value=label,...>] [CMD:<command-id>]
//! ```
//!
//! Blank lines and `#` comments are ignored. Any malformed line fails the
//! whole text; nothing is partially loaded.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use tracing::debug;
use vdiag_core::DangerLevel;

use crate::error::{GrammarError, GrammarResult};
use crate::formula::Formula;
use crate::ruleset::{Entry, RuleSet};
use crate::types::{
    BitMapping, BusClass, CommandRule, DtcCalc, DtcRule, ModuleDescriptor, Pattern, Protocol,
    ResponseRule, Span,
};

/// Largest 29-bit extended CAN identifier
const MAX_ADDRESS: u32 = 0x1FFF_FFFF;

/// Key/value tokens following the directive tag
struct Tokens<'a> {
    line: usize,
    tag: &'a str,
    values: BTreeMap<&'a str, &'a str>,
}

impl<'a> Tokens<'a> {
    fn split(line: usize, tag: &'a str, rest: &[&'a str]) -> GrammarResult<Self> {
        let mut values = BTreeMap::new();
        for token in rest {
            let (key, value) = token.split_once(':').ok_or_else(|| {
                GrammarError::new(line, format!("{}: expected KEY:VALUE, got '{}'", tag, token))
            })?;
            if values.insert(key, value).is_some() {
                return Err(GrammarError::new(
                    line,
                    format!("{}: duplicate key {}", tag, key),
                ));
            }
        }
        Ok(Self { line, tag, values })
    }

    fn error(&self, message: impl std::fmt::Display) -> GrammarError {
        GrammarError::new(self.line, format!("{}: {}", self.tag, message))
    }

    fn required(&mut self, key: &str) -> GrammarResult<&'a str> {
        match self.values.remove(key) {
            Some(value) if !value.is_empty() => Ok(value),
            Some(_) => Err(self.error(format_args!("empty value for {}", key))),
            None => Err(self.error(format_args!("missing required key {}", key))),
        }
    }

    fn optional(&mut self, key: &str) -> GrammarResult<Option<&'a str>> {
        match self.values.remove(key) {
            Some("") => Err(self.error(format_args!("empty value for {}", key))),
            other => Ok(other),
        }
    }

    /// Reject keys no directive consumed
    fn finish(self) -> GrammarResult<()> {
        match self.values.keys().next() {
            Some(key) => Err(self.error(format_args!("unknown key {}", key))),
            None => Ok(()),
        }
    }
}

/// Compile rule text into a rule set
pub fn parse(text: &str) -> GrammarResult<RuleSet> {
    let mut rules = RuleSet::new();
    let mut last_command: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let (tag, primary) = parts[0].split_once(':').ok_or_else(|| {
            GrammarError::new(line, format!("expected TAG:VALUE, got '{}'", parts[0]))
        })?;
        if primary.is_empty() {
            return Err(GrammarError::new(line, format!("{}: empty primary value", tag)));
        }
        let mut tokens = Tokens::split(line, tag, &parts[1..])?;

        match tag {
            "M" => rules.push_module(parse_module(primary, &mut tokens)?),
            "C" => {
                let command = parse_command(primary, &mut tokens)?;
                last_command = Some(command.id().to_string());
                rules.push_command(command);
            }
            "DTC" => rules.push_dtc(parse_dtc(primary, &mut tokens, last_command.as_deref())?),
            "R" => rules.push_response(parse_response(primary, &mut tokens)?),
            "BM" => rules.push_bit_mapping(parse_bit_mapping(
                primary,
                &mut tokens,
                last_command.as_deref(),
            )?),
            other => {
                return Err(GrammarError::new(
                    line,
                    format!("unknown directive tag '{}'", other),
                ))
            }
        }
        tokens.finish()?;
    }

    let counts = rules.counts();
    debug!(
        modules = counts.modules,
        commands = counts.commands,
        responses = counts.responses,
        dtcs = counts.dtcs,
        bit_mappings = counts.bit_mappings,
        "Compiled rule text"
    );
    Ok(rules)
}

fn parse_module(name: &str, tokens: &mut Tokens<'_>) -> GrammarResult<ModuleDescriptor> {
    if !is_identifier(name) {
        return Err(tokens.error(format_args!("invalid module name '{}'", name)));
    }
    let address_text = tokens.required("A")?;
    let address = parse_hex_u32(address_text)
        .filter(|&a| a <= MAX_ADDRESS)
        .ok_or_else(|| tokens.error(format_args!("invalid address '{}'", address_text)))?;
    let protocol = tokens.required("P")?;
    let bus = tokens.required("B")?;

    Ok(ModuleDescriptor {
        name: name.to_string(),
        address,
        protocol: Protocol::from_tag(protocol),
        bus: BusClass::from_tag(bus),
    })
}

fn parse_command(id: &str, tokens: &mut Tokens<'_>) -> GrammarResult<CommandRule> {
    let (module, action) = split_command_id(id)
        .ok_or_else(|| tokens.error(format_args!("identifier '{}' is not <module>.<action>", id)))?;

    let mode = tokens.required("M")?;
    let service = parse_hex_bytes(mode)
        .filter(|b| b.len() == 1)
        .map(|b| b[0])
        .ok_or_else(|| tokens.error(format_args!("invalid mode '{}'", mode)))?;

    let pid = match tokens.optional("PID")? {
        Some(text) => Some(
            parse_hex_bytes(text)
                .filter(|b| (1..=2).contains(&b.len()))
                .ok_or_else(|| tokens.error(format_args!("invalid PID '{}'", text)))?,
        ),
        None => None,
    };

    let data = match tokens.optional("D")? {
        Some(text) => parse_hex_bytes(text)
            .ok_or_else(|| tokens.error(format_args!("invalid data bytes '{}'", text)))?,
        None => Vec::new(),
    };

    let pattern = compile_pattern(tokens, "R")?;

    let declared = match tokens.optional("LVL")? {
        Some(text) => Some(
            text.parse::<DangerLevel>()
                .map_err(|e| tokens.error(e))?,
        ),
        None => None,
    };

    Ok(CommandRule::new(
        module, action, service, pid, data, pattern, declared,
    ))
}

fn parse_dtc(
    code: &str,
    tokens: &mut Tokens<'_>,
    last_command: Option<&str>,
) -> GrammarResult<DtcRule> {
    if code != "*" && !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(tokens.error(format_args!("invalid trouble code '{}'", code)));
    }

    let bytes = parse_span(tokens, "B")?;
    if bytes.width() > 8 {
        return Err(tokens.error("records wider than 8 bytes are not supported"));
    }
    let bits = parse_span(tokens, "BITS")?;
    if bits.end >= bytes.width() * 8 {
        return Err(tokens.error(format_args!(
            "bit range {} exceeds a {}-byte record",
            bits,
            bytes.width()
        )));
    }

    let calc_text = tokens.required("CALC")?;
    let calc = calc_text.parse::<DtcCalc>().map_err(|e| tokens.error(e))?;

    let stride = match tokens.optional("STRIDE")? {
        Some(text) => {
            let stride = text
                .parse::<usize>()
                .ok()
                .filter(|&s| s >= bytes.width())
                .ok_or_else(|| tokens.error(format_args!("invalid stride '{}'", text)))?;
            Some(stride)
        }
        None => None,
    };

    let command = match tokens.optional("CMD")? {
        Some("*") => None,
        Some(id) => Some(checked_command_id(tokens, id)?),
        None => last_command.map(str::to_string),
    };

    Ok(DtcRule {
        code: code.to_string(),
        command,
        bytes,
        bits,
        calc,
        stride,
    })
}

fn parse_response(command: &str, tokens: &mut Tokens<'_>) -> GrammarResult<ResponseRule> {
    let command = checked_command_id(tokens, command)?;
    let pattern = compile_pattern(tokens, "PATTERN")?;

    let fields: Vec<String> = tokens
        .required("EXTRACT")?
        .split(',')
        .map(str::to_string)
        .collect();
    for (i, field) in fields.iter().enumerate() {
        if !is_identifier(field) {
            return Err(tokens.error(format_args!("invalid field name '{}'", field)));
        }
        if fields[..i].contains(field) {
            return Err(tokens.error(format_args!("duplicate field '{}'", field)));
        }
        let named = pattern.regex().capture_names().flatten().any(|n| n == field.as_str());
        if !named && pattern.regex().captures_len() <= i + 1 {
            return Err(tokens.error(format_args!("pattern has no capture for field '{}'", field)));
        }
    }

    let mut formulas: Vec<Option<Formula>> = vec![None; fields.len()];
    if let Some(text) = tokens.optional("CALC")? {
        for (i, item) in text.split(',').enumerate() {
            let (slot, expr) = match item.split_once('=') {
                Some((name, expr)) => {
                    let slot = fields.iter().position(|f| f == name).ok_or_else(|| {
                        tokens.error(format_args!("formula for unknown field '{}'", name))
                    })?;
                    (slot, expr)
                }
                None if i < fields.len() => (i, item),
                None => return Err(tokens.error("more formulas than fields")),
            };
            if expr.is_empty() {
                continue;
            }
            let formula = Formula::parse(expr)
                .map_err(|e| tokens.error(format_args!("formula '{}': {}", expr, e)))?;
            formulas[slot] = Some(formula);
        }
    }

    let mut units: Vec<Option<String>> = vec![None; fields.len()];
    if let Some(text) = tokens.optional("UNIT")? {
        let items: Vec<&str> = text.split(',').collect();
        if items.len() > fields.len() {
            return Err(tokens.error("more units than fields"));
        }
        for (slot, unit) in items.into_iter().enumerate() {
            if !unit.is_empty() {
                units[slot] = Some(unit.to_string());
            }
        }
    }

    Ok(ResponseRule {
        command,
        pattern,
        fields,
        formulas,
        units,
    })
}

fn parse_bit_mapping(
    field: &str,
    tokens: &mut Tokens<'_>,
    last_command: Option<&str>,
) -> GrammarResult<BitMapping> {
    if !is_identifier(field) {
        return Err(tokens.error(format_args!("invalid field name '{}'", field)));
    }
    let byte_text = tokens.required("BYTE")?;
    let byte = byte_text
        .parse::<usize>()
        .map_err(|_| tokens.error(format_args!("invalid byte index '{}'", byte_text)))?;
    let bits = parse_span(tokens, "BIT")?;
    if bits.end > 7 {
        return Err(tokens.error(format_args!("bit range {} exceeds one byte", bits)));
    }

    let mut meanings = BTreeMap::new();
    let meaning_text = tokens.optional("MEANING")?;
    for pair in meaning_text.into_iter().flat_map(|text| text.split(',')) {
        let (value, label) = pair
            .split_once('=')
            .filter(|(_, label)| !label.is_empty())
            .ok_or_else(|| tokens.error(format_args!("invalid meaning '{}'", pair)))?;
        let value = parse_number(value)
            .ok_or_else(|| tokens.error(format_args!("invalid meaning value '{}'", value)))?;
        if meanings.insert(value, label.to_string()).is_some() {
            return Err(tokens.error(format_args!("duplicate meaning for value {}", value)));
        }
    }

    let command = match tokens.optional("CMD")? {
        Some(id) => checked_command_id(tokens, id)?,
        None => last_command
            .map(str::to_string)
            .ok_or_else(|| tokens.error("no command to bind to; add CMD:<command-id>"))?,
    };

    Ok(BitMapping {
        field: field.to_string(),
        command,
        byte,
        bits,
        meanings,
    })
}

/// Serialize a rule set as canonical rule text
pub fn to_text(rules: &RuleSet) -> String {
    let mut out = String::new();
    for entry in rules.entries() {
        // Writing to a String cannot fail
        let _ = match *entry {
            Entry::Module(idx) => write_module(&mut out, &rules.all_modules()[idx]),
            Entry::Command(idx) => write_command(&mut out, &rules.all_commands()[idx]),
            Entry::Response(idx) => write_response(&mut out, &rules.responses()[idx]),
            Entry::Dtc(idx) => write_dtc(&mut out, &rules.dtc_rules()[idx]),
            Entry::BitMap(idx) => write_bit_mapping(&mut out, &rules.bit_mappings()[idx]),
        };
    }
    out
}

/// Render a single command rule as one line of rule text
pub fn command_line(rule: &CommandRule) -> String {
    let mut out = String::new();
    let _ = write_command(&mut out, rule);
    out.trim_end().to_string()
}

/// Render a single module descriptor as one line of rule text
pub fn module_line(module: &ModuleDescriptor) -> String {
    let mut out = String::new();
    let _ = write_module(&mut out, module);
    out.trim_end().to_string()
}

/// Render a single response rule as one line of rule text
pub fn response_line(rule: &ResponseRule) -> String {
    let mut out = String::new();
    let _ = write_response(&mut out, rule);
    out.trim_end().to_string()
}

/// Render a single trouble-code rule as one line of rule text
pub fn dtc_line(rule: &DtcRule) -> String {
    let mut out = String::new();
    let _ = write_dtc(&mut out, rule);
    out.trim_end().to_string()
}

/// Render a single bit mapping as one line of rule text
pub fn bit_mapping_line(mapping: &BitMapping) -> String {
    let mut out = String::new();
    let _ = write_bit_mapping(&mut out, mapping);
    out.trim_end().to_string()
}

fn write_module(out: &mut String, m: &ModuleDescriptor) -> std::fmt::Result {
    writeln!(
        out,
        "M:{} A:{} P:{} B:{}",
        m.name,
        m.address_hex(),
        m.protocol,
        m.bus
    )
}

fn write_command(out: &mut String, c: &CommandRule) -> std::fmt::Result {
    write!(out, "C:{} M:{:02X}", c.id(), c.service())?;
    if let Some(pid) = c.pid() {
        write!(out, " PID:{}", hex::encode_upper(pid))?;
    }
    if !c.data().is_empty() {
        write!(out, " D:{}", hex::encode_upper(c.data()))?;
    }
    write!(out, " R:{}", c.response().source())?;
    if let Some(level) = c.declared_level() {
        write!(out, " LVL:{}", level)?;
    }
    writeln!(out)
}

fn write_response(out: &mut String, r: &ResponseRule) -> std::fmt::Result {
    write!(
        out,
        "R:{} PATTERN:{} EXTRACT:{}",
        r.command,
        r.pattern.source(),
        r.fields.join(",")
    )?;
    let formulas: Vec<String> = r
        .fields
        .iter()
        .zip(&r.formulas)
        .filter_map(|(field, formula)| formula.as_ref().map(|f| format!("{}={}", field, f)))
        .collect();
    if !formulas.is_empty() {
        write!(out, " CALC:{}", formulas.join(","))?;
    }
    if r.units.iter().any(Option::is_some) {
        let units: Vec<&str> = r.units.iter().map(|u| u.as_deref().unwrap_or("")).collect();
        write!(out, " UNIT:{}", units.join(","))?;
    }
    writeln!(out)
}

fn write_dtc(out: &mut String, d: &DtcRule) -> std::fmt::Result {
    write!(
        out,
        "DTC:{} B:{} BITS:{} CALC:{}",
        d.code, d.bytes, d.bits, d.calc
    )?;
    if let Some(stride) = d.stride {
        write!(out, " STRIDE:{}", stride)?;
    }
    writeln!(out, " CMD:{}", d.command.as_deref().unwrap_or("*"))
}

fn write_bit_mapping(out: &mut String, b: &BitMapping) -> std::fmt::Result {
    let meanings: Vec<String> = b
        .meanings
        .iter()
        .map(|(value, label)| format!("{}={}", value, label))
        .collect();
    write!(out, "BM:{} BYTE:{} BIT:{}", b.field, b.byte, b.bits)?;
    if !meanings.is_empty() {
        write!(out, " MEANING:{}", meanings.join(","))?;
    }
    writeln!(out, " CMD:{}", b.command)
}

fn compile_pattern(tokens: &mut Tokens<'_>, key: &str) -> GrammarResult<Pattern> {
    let source = tokens.required(key)?;
    Pattern::new(source).map_err(|e| tokens.error(format_args!("invalid pattern: {}", e)))
}

fn checked_command_id(tokens: &Tokens<'_>, id: &str) -> GrammarResult<String> {
    split_command_id(id)
        .map(|_| id.to_string())
        .ok_or_else(|| tokens.error(format_args!("identifier '{}' is not <module>.<action>", id)))
}

/// Split `<module>.<action>`, both non-empty identifiers
pub fn split_command_id(id: &str) -> Option<(&str, &str)> {
    let (module, action) = id.split_once('.')?;
    (is_identifier(module) && is_identifier(action)).then_some((module, action))
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn strip_hex_prefix(text: &str) -> &str {
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text)
}

fn parse_hex_u32(text: &str) -> Option<u32> {
    let digits = strip_hex_prefix(text);
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    let digits = strip_hex_prefix(text);
    if digits.is_empty() {
        return None;
    }
    hex::decode(digits).ok()
}

fn parse_number(text: &str) -> Option<u32> {
    if text.starts_with("0x") || text.starts_with("0X") {
        u32::from_str_radix(&text[2..], 16).ok()
    } else {
        text.parse().ok()
    }
}

fn parse_span(tokens: &mut Tokens<'_>, key: &str) -> GrammarResult<Span> {
    let text = tokens.required(key)?;
    let parsed: Option<(usize, usize)> = match text.split_once('-') {
        Some((lo, hi)) => lo.parse().ok().zip(hi.parse().ok()),
        None => text.parse().ok().map(|n| (n, n)),
    };
    match parsed {
        Some((start, end)) if start <= end => Ok(Span::new(start, end)),
        _ => Err(tokens.error(format_args!("invalid range '{}' for {}", text, key))),
    }
}
