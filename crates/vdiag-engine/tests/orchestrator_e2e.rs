//! E2E tests for the orchestrator
//!
//! Tests the full loop against a temporary knowledge directory and a scripted
//! mock transport:
//! 1. Lookup through the vehicle and reference tiers
//! 2. Classification and operator confirmation
//! 3. Dispatch, reassembly and decoding
//! 4. Learning into the vehicle rule file

use std::path::PathBuf;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rstest::rstest;
use tempfile::TempDir;
use tokio::sync::mpsc;
use vdiag_core::{DangerLevel, DiagError, Intent, VehicleId};
use vdiag_engine::{
    CancelToken, ConfirmationMachine, ConfirmationPrompt, Dispatcher, DispatchError, LearnStatus,
    Orchestrator, Outcome, Reply, ResearchReason, ResearchStatus, ScriptedPrompt, TimeoutConfig,
    RISK_PHRASE,
};
use vdiag_engine::transport::MockTransportAdapter;
use vdiag_rules::{Decoded, FlagValue, RuleSet};
use vdiag_store::{KnowledgeStore, Tier};

// =============================================================================
// Fixtures
// =============================================================================

const VEHICLE_RULES: &str = "\
# vdiag rules v1 Ford Focus 2015
M:HVAC A:7A0 P:CAN B:HS
C:HVAC.READ_DTC M:03 R:43[0-9A-F]{4,}
C:HVAC.BLEND_DOOR_CONTROL M:2F PID:0101 D:0300 R:6F0101
M:BCM A:726 P:CAN B:HS
C:BCM.READ_DTC M:19 D:02FF R:5902
M:ABS A:760 P:CAN B:HS
C:ABS.BLEED_BRAKES M:31 D:0102 R:710102
";

const OBD2_REFERENCE: &str = "\
M:ECM A:7E0 P:CAN B:HS
C:ECM.READ_RPM M:01 PID:0C R:410C[0-9A-F]{4}
R:ECM.READ_RPM PATTERN:410C([0-9A-F]{4}) EXTRACT:rpm CALC:(A*256+B)/4 UNIT:rpm
C:ECM.READ_DTC M:03 R:43
DTC:P0133 B:2-3 BITS:0-15 CALC:SAE
C:ECM.READ_STATUS M:22 PID:0110 R:620110
BM:mil BYTE:3 BIT:7 MEANING:0=off,1=on
BM:mode BYTE:3 BIT:4-6 MEANING:0=idle,1=run,2=limp
";

fn focus() -> VehicleId {
    VehicleId::new("Ford", "Focus", 2015)
}

struct Bench {
    _dir: TempDir,
    vehicle_file: PathBuf,
    mock: Arc<MockTransportAdapter>,
    prompt: Arc<ScriptedPrompt>,
    orchestrator: Orchestrator,
}

fn bench_with(prompt: ScriptedPrompt) -> Bench {
    let dir = tempfile::tempdir().unwrap();
    let store = KnowledgeStore::open(dir.path())
        .unwrap()
        .with_reference("obd2", OBD2_REFERENCE.parse::<RuleSet>().unwrap());
    let vehicle_file = store.path_for(&focus());
    std::fs::write(&vehicle_file, VEHICLE_RULES).unwrap();

    let mock = Arc::new(MockTransportAdapter::new());
    let prompt = Arc::new(prompt);
    let orchestrator = Orchestrator::new(Arc::new(store), mock.clone(), prompt.clone());
    Bench {
        _dir: dir,
        vehicle_file,
        mock,
        prompt,
        orchestrator,
    }
}

fn bench() -> Bench {
    bench_with(ScriptedPrompt::accept_all())
}

// =============================================================================
// Trouble codes
// =============================================================================

#[tokio::test]
async fn test_read_dtc_from_vehicle_rules() {
    let (tx, mut rx) = mpsc::channel(4);
    let mut b = bench();
    b.orchestrator = b.orchestrator.with_research(tx);
    b.mock
        .add_response_for(0x7A0, vec![0x03], vec![vec![0x43, 0x16, 0x32]]);

    let outcome = b
        .orchestrator
        .execute(&Intent::new(focus(), "HVAC.READ_DTC"))
        .await
        .unwrap();

    let Outcome::Success {
        decoded,
        tier,
        research,
        ..
    } = outcome
    else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(tier, Tier::Vehicle);
    assert_eq!(decoded.dtcs.len(), 1);
    assert_eq!(decoded.dtcs[0].raw, "1632");
    assert_eq!(decoded.dtcs[0].code, "P1632");
    assert!(!decoded.dtcs[0].known);

    // Unknown codes go to research without failing the command
    assert_eq!(research, Some(ResearchStatus::Queued));
    let request = rx.recv().await.unwrap();
    assert_eq!(request.reason, ResearchReason::UnknownDtcs);
    assert_eq!(request.unknown_dtcs, vec!["P1632".to_string()]);
    let errors = request.unknown_dtc_errors();
    assert_eq!(errors, vec![DiagError::UnknownDtc("P1632".to_string())]);
    assert!(errors.iter().all(|e| e.is_expected() && !e.is_fatal()));
    assert_eq!(b.mock.sent(), vec![(0x7A0, vec![0x03])]);
}

#[tokio::test]
async fn test_module_descriptor_from_vehicle_rules() {
    let b = bench();
    let record = b.orchestrator.store().record(&focus()).await.unwrap().unwrap();
    let hvac = record.rules.module("HVAC").unwrap();
    assert_eq!(hvac.address_hex(), "7A0");
    assert_eq!(hvac.protocol.to_string(), "CAN");
    assert_eq!(hvac.bus.to_string(), "HS");
}

// =============================================================================
// Confirmation
// =============================================================================

#[tokio::test]
async fn test_declined_actuation_is_never_sent() {
    let b = bench_with(ScriptedPrompt::new([Reply::Declined]));
    b.mock.add_response(vec![0x2F], vec![vec![0x6F, 0x01, 0x01]]);

    let outcome = b
        .orchestrator
        .execute(&Intent::new(focus(), "HVAC.BLEND_DOOR_CONTROL"))
        .await
        .unwrap();

    match outcome {
        Outcome::Rejected { level, error, .. } => {
            assert_eq!(level, DangerLevel::Warning);
            assert_eq!(
                error,
                DiagError::ConfirmationDeclined("HVAC.BLEND_DOOR_CONTROL".to_string())
            );
            assert!(error.to_string().contains("not executed"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(b.prompt.asked(), vec![1]);
    assert!(b.mock.sent().is_empty());
}

#[tokio::test]
async fn test_bare_yes_does_not_pass_warning_step() {
    let b = bench_with(ScriptedPrompt::new([Reply::Accepted]));

    let outcome = b
        .orchestrator
        .execute(&Intent::new(focus(), "HVAC.BLEND_DOOR_CONTROL"))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Rejected { .. }));
    assert!(!outcome.was_dispatched());
    assert!(b.mock.sent().is_empty());
}

#[tokio::test]
async fn test_typed_acknowledgement_dispatches_actuation() {
    let b = bench_with(ScriptedPrompt::new([Reply::Typed(
        "I UNDERSTAND THE RISKS".to_string(),
    )]));
    b.mock.add_response_for(
        0x7A0,
        vec![0x2F, 0x01, 0x01, 0x03, 0x00],
        vec![vec![0x6F, 0x01, 0x01, 0x03, 0x00]],
    );

    let outcome = b
        .orchestrator
        .execute(&Intent::new(focus(), "HVAC.BLEND_DOOR_CONTROL"))
        .await
        .unwrap();

    assert!(outcome.is_success(), "got {outcome:?}");
    assert_eq!(
        b.mock.sent(),
        vec![(0x7A0, vec![0x2F, 0x01, 0x01, 0x03, 0x00])]
    );
}

const BLEED_REQUEST: [u8; 3] = [0x31, 0x01, 0x02];

fn risk_phrase() -> Reply {
    Reply::Typed(RISK_PHRASE.to_string())
}

#[tokio::test]
async fn test_danger_command_passes_all_three_steps() {
    let b = bench_with(ScriptedPrompt::new([
        risk_phrase(),
        Reply::Accepted,
        Reply::Typed("EXECUTE ABS.BLEED_BRAKES".to_string()),
    ]));
    b.mock
        .add_response_for(0x760, BLEED_REQUEST.to_vec(), vec![vec![0x71, 0x01, 0x02]]);

    let outcome = b
        .orchestrator
        .execute(&Intent::new(focus(), "ABS.BLEED_BRAKES"))
        .await
        .unwrap();

    assert!(outcome.is_success(), "got {outcome:?}");
    assert_eq!(b.prompt.asked(), vec![1, 2, 3]);
    assert_eq!(b.mock.sent(), vec![(0x760, BLEED_REQUEST.to_vec())]);
}

#[rstest]
#[case::bare_yes_for_phrase(vec![Reply::Accepted], vec![1])]
#[case::wrong_phrase(vec![Reply::Typed("i understand the risks".to_string())], vec![1])]
#[case::preconditions_declined(vec![risk_phrase(), Reply::Declined], vec![1, 2])]
#[case::bare_yes_for_token(vec![risk_phrase(), Reply::Accepted, Reply::Accepted], vec![1, 2, 3])]
#[case::token_for_other_command(
    vec![risk_phrase(), Reply::Accepted, Reply::Typed("EXECUTE ABS.READ_DTC".to_string())],
    vec![1, 2, 3]
)]
#[case::token_without_command(
    vec![risk_phrase(), Reply::Accepted, Reply::Typed("EXECUTE".to_string())],
    vec![1, 2, 3]
)]
#[tokio::test]
async fn test_danger_command_rejected_at_any_step(
    #[case] replies: Vec<Reply>,
    #[case] asked: Vec<usize>,
) {
    let b = bench_with(ScriptedPrompt::new(replies));
    b.mock
        .add_response_for(0x760, BLEED_REQUEST.to_vec(), vec![vec![0x71, 0x01, 0x02]]);

    let outcome = b
        .orchestrator
        .execute(&Intent::new(focus(), "ABS.BLEED_BRAKES"))
        .await
        .unwrap();

    match outcome {
        Outcome::Rejected { level, error, .. } => {
            assert_eq!(level, DangerLevel::Danger);
            assert_eq!(
                error,
                DiagError::ConfirmationDeclined("ABS.BLEED_BRAKES".to_string())
            );
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(b.prompt.asked(), asked);
    assert!(b.mock.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_intent_does_not_cancel_the_next() {
    let (handle, cancel) = CancelToken::new();
    let mut b = bench_with(ScriptedPrompt::default());
    b.orchestrator = b.orchestrator.with_cancel(cancel);
    b.mock
        .add_response_for(0x7A0, vec![0x03], vec![vec![0x43, 0x16, 0x32]]);

    // The prompt never answers; the operator gives up on the actuation
    let actuation = Intent::new(focus(), "HVAC.BLEND_DOOR_CONTROL");
    let (first, ()) = tokio::join!(b.orchestrator.execute(&actuation), async {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        handle.cancel();
    });
    match first.unwrap() {
        Outcome::Rejected { error, .. } => assert_eq!(error, DiagError::Cancelled),
        other => panic!("expected cancellation, got {other:?}"),
    }

    let second = b
        .orchestrator
        .execute(&Intent::new(focus(), "HVAC.READ_DTC"))
        .await
        .unwrap();
    assert!(second.is_success(), "got {second:?}");
    assert_eq!(b.mock.sent(), vec![(0x7A0, vec![0x03])]);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_prompt_times_out() {
    let b = bench_with(ScriptedPrompt::default());
    let orchestrator = b.orchestrator.with_timeouts(TimeoutConfig {
        confirmation_ms: 5_000,
        ..TimeoutConfig::default()
    });

    let outcome = orchestrator
        .execute(&Intent::new(focus(), "HVAC.BLEND_DOOR_CONTROL"))
        .await
        .unwrap();

    match outcome {
        Outcome::Rejected { error, .. } => {
            assert!(matches!(error, DiagError::ConfirmationTimedOut(_)));
        }
        other => panic!("expected timeout rejection, got {other:?}"),
    }
    assert!(b.mock.sent().is_empty());
}

#[tokio::test]
async fn test_token_only_dispatches_its_own_command() {
    let rules: RuleSet = VEHICLE_RULES.parse().unwrap();
    let read = rules.command("HVAC.READ_DTC").unwrap();
    let actuate = rules.command("HVAC.BLEND_DOOR_CONTROL").unwrap();
    let hvac = rules.module("HVAC").unwrap();

    let prompt: &dyn ConfirmationPrompt = &ScriptedPrompt::accept_all();
    let token = ConfirmationMachine::new(std::time::Duration::from_secs(1))
        .run(read, prompt)
        .await
        .unwrap();

    let mock = Arc::new(MockTransportAdapter::new());
    let dispatcher = Dispatcher::new(mock.clone(), &TimeoutConfig::default());
    let err = dispatcher.dispatch(token, actuate, hvac).await.unwrap_err();

    assert!(matches!(err, DispatchError::TokenMismatch { .. }));
    assert!(mock.sent().is_empty());
}

// =============================================================================
// Transport failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_incomplete_response_learns_nothing() {
    let b = bench();
    // First frame announces 11 bytes; the consecutive frame never arrives
    b.mock.add_response_for(
        0x726,
        vec![0x19, 0x02, 0xFF],
        vec![vec![0x10, 0x0B, 0x59, 0x02, 0xFF, 0x01, 0x23, 0x45]],
    );
    let before = std::fs::read_to_string(&b.vehicle_file).unwrap();

    let outcome = b
        .orchestrator
        .execute(&Intent::new(focus(), "BCM.READ_DTC"))
        .await
        .unwrap();

    match outcome {
        Outcome::TransportError { error, .. } => assert_eq!(
            error,
            DiagError::IncompleteResponse {
                received: 6,
                expected: 11
            }
        ),
        other => panic!("expected incomplete response, got {other:?}"),
    }
    assert_eq!(std::fs::read_to_string(&b.vehicle_file).unwrap(), before);
}

#[tokio::test]
async fn test_security_refusal_is_reported() {
    let b = bench();
    b.mock
        .add_response(vec![0x19, 0x02, 0xFF], vec![vec![0x7F, 0x19, 0x33]]);

    let outcome = b
        .orchestrator
        .execute(&Intent::new(focus(), "BCM.READ_DTC"))
        .await
        .unwrap();

    match outcome {
        Outcome::TransportError { error, .. } => {
            assert!(error.is_retryable_nack());
            assert_eq!(
                error,
                DiagError::SecurityDenied {
                    service: 0x19,
                    nrc: 0x33
                }
            );
        }
        other => panic!("expected security refusal, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unmatched_response_is_decode_mismatch() {
    let b = bench();
    b.mock
        .add_response_for(0x7A0, vec![0x03], vec![vec![0x47, 0x00]]);

    let outcome = b
        .orchestrator
        .execute(&Intent::new(focus(), "HVAC.READ_DTC"))
        .await
        .unwrap();

    match outcome {
        Outcome::DecodeMismatch { error, exchange, .. } => {
            assert!(matches!(error, DiagError::NoMatch { .. }));
            assert_eq!(exchange.payload, vec![0x47, 0x00]);
        }
        other => panic!("expected decode mismatch, got {other:?}"),
    }
}

// =============================================================================
// Lookup misses and learning
// =============================================================================

#[tokio::test]
async fn test_unknown_command_requests_research() {
    let (tx, mut rx) = mpsc::channel(4);
    let mut b = bench();
    b.orchestrator = b.orchestrator.with_research(tx);
    let intent = Intent::new(focus(), "TCM.READ_GEAR").with_query("what gear is it in");

    let outcome = b.orchestrator.execute(&intent).await.unwrap();

    match outcome {
        Outcome::NotFound { research, .. } => assert_eq!(research, ResearchStatus::Queued),
        other => panic!("expected not found, got {other:?}"),
    }
    let request = rx.recv().await.unwrap();
    assert_eq!(request.command, "TCM.READ_GEAR");
    assert_eq!(request.reason, ResearchReason::UnknownCommand);
    assert_eq!(request.query.as_deref(), Some("what gear is it in"));
    assert!(b.mock.sent().is_empty());
}

#[tokio::test]
async fn test_reference_hit_is_learned_into_vehicle_file() {
    let b = bench();
    b.mock.add_response_for(
        0x7E0,
        vec![0x01, 0x0C],
        vec![vec![0x41, 0x0C, 0x1A, 0xF8]],
    );
    let intent = Intent::new(focus(), "ECM.READ_RPM");

    let first = b.orchestrator.execute(&intent).await.unwrap();
    let Outcome::Success {
        decoded,
        tier,
        learned,
        ..
    } = first
    else {
        panic!("expected success, got {first:?}");
    };
    assert_eq!(tier, Tier::Reference);
    assert_eq!(learned, LearnStatus::Appended { version: 2 });
    assert_eq!(decoded.fields["rpm"].value, 1726.0);

    let text = std::fs::read_to_string(&b.vehicle_file).unwrap();
    assert!(text.starts_with(VEHICLE_RULES));
    assert!(text.contains("# learned "));
    assert!(text.contains("M:ECM A:7E0 P:CAN B:HS"));
    assert!(text.contains("R:ECM.READ_RPM PATTERN:410C([0-9A-F]{4})"));

    // Now answered from the vehicle tier; the same procedure is not appended twice
    let second = b.orchestrator.execute(&intent).await.unwrap();
    let Outcome::Success {
        decoded,
        tier,
        learned,
        ..
    } = second
    else {
        panic!("expected success, got {second:?}");
    };
    assert_eq!(tier, Tier::Vehicle);
    assert_eq!(learned, LearnStatus::Unchanged { version: 2 });
    assert_eq!(decoded.fields["rpm"].value, 1726.0);
}

#[tokio::test]
async fn test_learned_procedure_decodes_like_its_reference() {
    let b = bench();
    b.mock.add_response_for(
        0x7E0,
        vec![0x03],
        vec![vec![0x43, 0x03, 0x01, 0x33, 0xC1, 0x00, 0x00, 0x00]],
    );
    b.mock.add_response_for(
        0x7E0,
        vec![0x22, 0x01, 0x10],
        vec![vec![0x62, 0x01, 0x10, 0b1010_0000]],
    );

    for command in ["ECM.READ_DTC", "ECM.READ_STATUS"] {
        let intent = Intent::new(focus(), command);
        let mut runs = Vec::new();
        for expected_tier in [Tier::Reference, Tier::Vehicle] {
            let outcome = b.orchestrator.execute(&intent).await.unwrap();
            let Outcome::Success { decoded, tier, .. } = outcome else {
                panic!("expected success for {command}, got {outcome:?}");
            };
            assert_eq!(tier, expected_tier, "{command}");
            runs.push(decoded);
        }
        assert_eq!(runs[0], runs[1], "{command}");
    }

    let record = b.orchestrator.store().record(&focus()).await.unwrap().unwrap();
    let rules = &record.rules;
    let codes_payload = [0x43, 0x03, 0x01, 0x33, 0xC1, 0x00, 0x00, 0x00];
    let learned = decode_from(rules, "ECM.READ_DTC", &codes_payload);
    let codes: Vec<(&str, bool)> = learned
        .dtcs
        .iter()
        .map(|d| (d.code.as_str(), d.known))
        .collect();
    assert_eq!(codes, vec![("P0133", true), ("U0100", false)]);

    let status = decode_from(rules, "ECM.READ_STATUS", &[0x62, 0x01, 0x10, 0b1010_0000]);
    assert_eq!(
        status.flags["mil"],
        FlagValue::Enum {
            value: 1,
            label: Some("on".to_string())
        }
    );
    assert_eq!(
        status.flags["mode"],
        FlagValue::Enum {
            value: 2,
            label: Some("limp".to_string())
        }
    );

    let text = std::fs::read_to_string(&b.vehicle_file).unwrap();
    assert!(text.contains("DTC:P0133 B:2-3 BITS:0-15 CALC:SAE CMD:ECM.READ_DTC"));
    assert!(text.contains("BM:mil BYTE:3 BIT:7 MEANING:0=off,1=on CMD:ECM.READ_STATUS"));
}

fn decode_from(rules: &RuleSet, command: &str, payload: &[u8]) -> Decoded {
    vdiag_rules::decode(rules, command, payload).unwrap()
}
