//! Confirmation requests and their steps

use std::fmt;

use serde::Serialize;
use uuid::Uuid;
use vdiag_core::DangerLevel;
use vdiag_rules::CommandRule;

/// Phrase a WARNING command must be acknowledged with
pub const RISK_PHRASE: &str = "I UNDERSTAND THE RISKS";

/// Preconditions the operator confirms before a DANGER command
pub const DANGER_PRECONDITIONS: &[&str] = &[
    "ignition on, engine off",
    "vehicle stationary",
    "stable battery supply of at least 12.5 V",
];

/// What the operator has to do to pass a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "expect", rename_all = "snake_case")]
pub enum StepKind {
    /// Plain yes/no
    YesNo,
    /// Type the given phrase exactly
    TypedPhrase(String),
    /// Confirm that every listed precondition holds
    Preconditions(Vec<String>),
    /// Type the final token exactly
    FinalToken(String),
}

/// Operator answer to one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Accepted,
    Declined,
    /// Free text typed at the prompt
    Typed(String),
}

impl Reply {
    /// Interpret terminal input: `y`/`yes` accept, empty or `n`/`no` decline,
    /// anything else is kept as typed text
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "y" | "yes" => Reply::Accepted,
            "" | "n" | "no" => Reply::Declined,
            _ => Reply::Typed(trimmed.to_string()),
        }
    }
}

/// One acknowledgement in the sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationStep {
    /// 1-based position in the sequence
    pub number: usize,
    pub prompt: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl ConfirmationStep {
    /// Whether the reply passes this step
    ///
    /// Typed phrases and tokens must match exactly, surrounding whitespace
    /// aside. A bare yes never stands in for a typed acknowledgement.
    pub fn accepts(&self, reply: &Reply) -> bool {
        match (&self.kind, reply) {
            (_, Reply::Declined) => false,
            (StepKind::YesNo | StepKind::Preconditions(_), Reply::Accepted) => true,
            (StepKind::YesNo | StepKind::Preconditions(_), Reply::Typed(text)) => {
                Reply::from_input(text) == Reply::Accepted
            }
            (StepKind::TypedPhrase(expected) | StepKind::FinalToken(expected), Reply::Typed(text)) => {
                text.trim() == expected.as_str()
            }
            (StepKind::TypedPhrase(_) | StepKind::FinalToken(_), Reply::Accepted) => false,
        }
    }
}

/// Everything the UI needs to ask for confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationRequest {
    pub id: Uuid,
    pub command: String,
    pub module: String,
    pub level: DangerLevel,
    pub reason: String,
    pub risks: Vec<String>,
    pub preconditions: Vec<String>,
    pub steps: Vec<ConfirmationStep>,
}

impl ConfirmationRequest {
    /// Build the request for a classified command
    ///
    /// The step list depends only on the command's static tier.
    pub fn for_command(rule: &CommandRule) -> Self {
        let classification = rule.classification();
        let level = classification.level;
        let command = rule.id().to_string();
        let risks = risks_for(level, rule.module());
        let preconditions: Vec<String> = if level == DangerLevel::Danger {
            DANGER_PRECONDITIONS.iter().map(|p| p.to_string()).collect()
        } else {
            Vec::new()
        };

        let mut kinds = Vec::new();
        match level {
            DangerLevel::Safe => {}
            DangerLevel::Caution => kinds.push((
                StepKind::YesNo,
                format!("Execute {}? [y/N]", command),
            )),
            DangerLevel::Warning => kinds.push((
                StepKind::TypedPhrase(RISK_PHRASE.to_string()),
                format!("Type '{}' to acknowledge the risks above", RISK_PHRASE),
            )),
            DangerLevel::Danger => {
                kinds.push((
                    StepKind::TypedPhrase(RISK_PHRASE.to_string()),
                    format!("Type '{}' to acknowledge the risks above", RISK_PHRASE),
                ));
                kinds.push((
                    StepKind::Preconditions(preconditions.clone()),
                    "Confirm every precondition above holds [y/N]".to_string(),
                ));
                let token = final_token(&command);
                kinds.push((
                    StepKind::FinalToken(token.clone()),
                    format!("Type '{}' to execute", token),
                ));
            }
        }

        let steps = kinds
            .into_iter()
            .enumerate()
            .map(|(i, (kind, prompt))| ConfirmationStep {
                number: i + 1,
                prompt,
                kind,
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            command,
            module: rule.module().to_string(),
            level,
            reason: classification.reason.clone(),
            risks,
            preconditions,
            steps,
        }
    }

    /// Number of distinct acknowledgements required
    pub fn required_acknowledgements(&self) -> usize {
        self.steps.len()
    }
}

impl fmt::Display for ConfirmationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] {}", self.level, self.command)?;
        writeln!(f, "Reason: {}", self.reason)?;
        if !self.risks.is_empty() {
            writeln!(f, "Risks:")?;
            for risk in &self.risks {
                writeln!(f, "  - {}", risk)?;
            }
        }
        if !self.preconditions.is_empty() {
            writeln!(f, "Preconditions:")?;
            for precondition in &self.preconditions {
                writeln!(f, "  - {}", precondition)?;
            }
        }
        write!(
            f,
            "{} acknowledgement(s) required",
            self.required_acknowledgements()
        )
    }
}

/// Token a DANGER command must be typed with
pub fn final_token(command: &str) -> String {
    format!("EXECUTE {}", command)
}

fn risks_for(level: DangerLevel, module: &str) -> Vec<String> {
    let mut risks = Vec::new();
    if level >= DangerLevel::Caution {
        risks.push(format!("stored data or settings on {} may change", module));
    }
    if level >= DangerLevel::Warning {
        risks.push(format!("actuators driven by {} may move", module));
        risks.push(format!("{} may reset or leave its normal mode", module));
    }
    if level >= DangerLevel::Danger {
        risks.push(format!(
            "an interrupted or failed operation can disable {} until it is repaired",
            module
        ));
    }
    risks
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use vdiag_rules::RuleSet;

    fn rule(line: &str) -> CommandRule {
        let rules = RuleSet::parse(line).unwrap();
        rules.all_commands()[0].clone()
    }

    #[rstest]
    #[case("C:ECM.READ_RPM M:01 PID:0C R:410C", DangerLevel::Safe, 0)]
    #[case("C:ECM.CLEAR_DTC M:04 R:44", DangerLevel::Caution, 1)]
    #[case("C:HVAC.BLEND_DOOR_CONTROL M:2F D:01030101 R:6F", DangerLevel::Warning, 1)]
    #[case("C:ABS.BLEED_BRAKES M:31 D:0102 R:71", DangerLevel::Danger, 3)]
    fn test_steps_per_tier(#[case] line: &str, #[case] level: DangerLevel, #[case] steps: usize) {
        let request = ConfirmationRequest::for_command(&rule(line));
        assert_eq!(request.level, level);
        assert_eq!(request.required_acknowledgements(), steps);
        assert!(steps >= level.required_acknowledgements());
    }

    #[test]
    fn test_rendering_states_tier_and_reason() {
        let request =
            ConfirmationRequest::for_command(&rule("C:HVAC.BLEND_DOOR_CONTROL M:2F D:0103 R:6F"));
        let text = request.to_string();
        assert!(text.starts_with("[WARNING] HVAC.BLEND_DOOR_CONTROL"));
        assert!(text.contains(&format!("Reason: {}", request.reason)));
        assert!(!request.reason.is_empty());
    }

    #[test]
    fn test_danger_sequence_is_distinct() {
        let request = ConfirmationRequest::for_command(&rule("C:ABS.BLEED_BRAKES M:31 D:0102 R:71"));
        assert_eq!(request.preconditions.len(), DANGER_PRECONDITIONS.len());
        assert_eq!(
            request.steps[2].kind,
            StepKind::FinalToken("EXECUTE ABS.BLEED_BRAKES".to_string())
        );
        assert_ne!(request.steps[0].kind, request.steps[2].kind);
    }

    #[test]
    fn test_step_acceptance() {
        let yes_no = ConfirmationStep {
            number: 1,
            prompt: String::new(),
            kind: StepKind::YesNo,
        };
        assert!(yes_no.accepts(&Reply::Accepted));
        assert!(yes_no.accepts(&Reply::Typed("YES".to_string())));
        assert!(!yes_no.accepts(&Reply::Declined));

        let phrase = ConfirmationStep {
            number: 1,
            prompt: String::new(),
            kind: StepKind::TypedPhrase(RISK_PHRASE.to_string()),
        };
        assert!(phrase.accepts(&Reply::Typed(" I UNDERSTAND THE RISKS ".to_string())));
        assert!(!phrase.accepts(&Reply::Typed("i understand the risks".to_string())));
        assert!(!phrase.accepts(&Reply::Accepted));
    }

    #[test]
    fn test_reply_from_input() {
        assert_eq!(Reply::from_input("Y\n"), Reply::Accepted);
        assert_eq!(Reply::from_input("\n"), Reply::Declined);
        assert_eq!(
            Reply::from_input("EXECUTE ABS.BLEED_BRAKES\n"),
            Reply::Typed("EXECUTE ABS.BLEED_BRAKES".to_string())
        );
    }
}
