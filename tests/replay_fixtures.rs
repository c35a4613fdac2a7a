use vtyshell::error::ConnectError;
use vtyshell::session::{NormalizeOptions, SessionEvent, SessionRecorder, SessionReplayer};

const BASIC_FIXTURE: &str = include_str!("fixtures/session_replay_basic.jsonl");
const EXPECTED_SNAPSHOT: &str = include_str!("fixtures/session_replay_expected_snapshot.txt");
const FAILURE_FIXTURE: &str = include_str!("fixtures/session_replay_failure.jsonl");
const STATE_SWITCH_FIXTURE: &str = include_str!("fixtures/session_replay_state_switch.jsonl");
const NOISY_FIXTURE: &str = r#"{"ts_ms":1,"event":{"kind":"connection_established","host":"admin@192.168.1.1:22","prompt_after":"router#","privilege_after":"privilegeExec"}}
{"ts_ms":2,"event":{"kind":"raw_chunk","data":"junk"}}
{"ts_ms":3,"event":{"kind":"privilege_changed","privilege":"privilegeExec"}}
{"ts_ms":4,"event":{"kind":"command_output","input":"show ip int br","privilege":"privilegeExec","prompt_before":"router#","prompt_after":"router#","success":true,"raw_output":"Gi0/0 up"}}
"#;
const MISSING_PROMPT_AFTER_FIXTURE: &str = r#"{"ts_ms":1,"event":{"kind":"connection_established","host":"admin@192.168.1.1:22","prompt_after":"router#","privilege_after":"privilegeExec"}}
{"ts_ms":2,"event":{"kind":"command_output","input":"show version","privilege":"privilegeExec","success":true,"raw_output":"Version 1.0"}}
"#;

#[test]
fn fixture_exposes_connection_context() {
    let replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).expect("load fixture");
    let ctx = replayer.initial_context().expect("context");

    assert_eq!(ctx.host, "admin@192.168.1.1:22");
    assert_eq!(ctx.prompt, "router#");
    assert_eq!(ctx.privilege, "privilegeExec");
}

#[test]
fn fixture_replays_script_without_ssh() {
    let mut replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).expect("load fixture");
    let script = vec![
        ("privilegeExec".to_string(), "terminal length 0".to_string()),
        ("privilegeExec".to_string(), "show version".to_string()),
    ];

    let outputs = replayer.replay_script(&script).expect("replay script");
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[1].raw_output, "Cisco IOS XE Version 16.9.1");
}

#[test]
fn fixture_reports_mismatch_for_wrong_privilege() {
    let mut replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).expect("load fixture");
    let err = match replayer.replay_next_in_privilege("show version", "configuration") {
        Ok(_) => panic!("mismatched privilege should fail"),
        Err(err) => err,
    };

    assert!(matches!(err, ConnectError::ReplayMismatchError(_)));
}

#[test]
fn fixture_privilege_match_is_case_insensitive() {
    let mut replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).expect("load fixture");

    let output = replayer
        .replay_next_in_privilege("show version", "PRIVILEGEEXEC")
        .expect("case-insensitive privilege match");
    assert_eq!(output.raw_output, "Cisco IOS XE Version 16.9.1");
}

#[test]
fn replay_script_returns_error_when_middle_command_missing() {
    let mut replayer = SessionReplayer::from_jsonl(NOISY_FIXTURE).expect("load noisy fixture");
    let script = vec![
        ("privilegeExec".to_string(), "show ip int br".to_string()),
        ("privilegeExec".to_string(), "show version".to_string()),
    ];

    let err = match replayer.replay_script(&script) {
        Ok(_) => panic!("expected replay script failure"),
        Err(err) => err,
    };
    assert!(matches!(err, ConnectError::ReplayMismatchError(_)));
}

#[test]
fn replay_script_snapshot_matches_expected_output_sequence() {
    let mut replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).expect("load fixture");
    let script = vec![
        ("privilegeExec".to_string(), "terminal length 0".to_string()),
        ("privilegeExec".to_string(), "show version".to_string()),
    ];

    let outputs = replayer.replay_script(&script).expect("replay script");
    let actual = script
        .iter()
        .zip(outputs.iter())
        .map(|((_, input), out)| format!("{}|{}|{}", input, true, out.raw_output))
        .collect::<Vec<_>>()
        .join("\n");

    assert_eq!(actual, EXPECTED_SNAPSHOT.trim());
}

#[test]
fn replay_without_prompt_after_still_yields_raw_output() {
    let mut replayer = SessionReplayer::from_jsonl(MISSING_PROMPT_AFTER_FIXTURE).expect("load fixture");
    let output = replayer
        .replay_next_in_privilege("show version", "privilegeExec")
        .expect("replay");
    assert_eq!(output.raw_output, "Version 1.0");
}

#[test]
fn failure_fixture_replays_unsuccessful_command_output_as_error() {
    let mut replayer = SessionReplayer::from_jsonl(FAILURE_FIXTURE).expect("load fixture");
    let err = match replayer.replay_next_in_privilege("show running-config", "privilegeExec") {
        Ok(_) => panic!("a recorded failure should surface as a replay error"),
        Err(err) => err,
    };

    match err {
        ConnectError::ReplayMismatchError(msg) => assert!(msg.contains("Invalid input")),
        other => panic!("unexpected error variant: {other:?}"),
    }
}

#[test]
fn state_switch_fixture_selects_output_by_privilege() {
    let mut replayer = SessionReplayer::from_jsonl(STATE_SWITCH_FIXTURE).expect("load fixture");

    let config_output = replayer
        .replay_next_in_privilege("show version", "configuration")
        .expect("replay configuration output");
    assert_eq!(config_output.raw_output, "Version in config context");

    let enable_output = replayer
        .replay_next_in_privilege("show version", "privilegeExec")
        .expect("replay privilegeExec output");
    assert_eq!(enable_output.raw_output, "Version in enable context");
}

#[test]
fn replay_fixtures_have_basic_quality_guarantees() {
    let fixtures = [
        ("basic", BASIC_FIXTURE),
        ("failure", FAILURE_FIXTURE),
        ("state_switch", STATE_SWITCH_FIXTURE),
        ("noisy", NOISY_FIXTURE),
        ("missing_prompt_after", MISSING_PROMPT_AFTER_FIXTURE),
    ];

    for (name, content) in fixtures {
        let recorder = SessionRecorder::from_jsonl(content).expect("parse fixture");
        let entries = recorder.entries().expect("entries");
        assert!(!entries.is_empty(), "fixture '{name}' should not be empty");

        let mut has_connection_established = false;
        let mut has_command_output = false;
        let mut last_ts = 0_u128;

        for (idx, entry) in entries.iter().enumerate() {
            if idx > 0 {
                assert!(
                    entry.ts_ms >= last_ts,
                    "fixture '{name}' has non-monotonic timestamp at index {idx}"
                );
            }
            last_ts = entry.ts_ms;

            match &entry.event {
                SessionEvent::ConnectionEstablished { .. } => has_connection_established = true,
                SessionEvent::CommandOutput { input, privilege, .. } => {
                    has_command_output = true;
                    assert!(!input.trim().is_empty(), "fixture '{name}' contains empty input");
                    assert!(!privilege.trim().is_empty(), "fixture '{name}' contains empty privilege");
                }
                _ => {}
            }
        }

        assert!(
            has_connection_established,
            "fixture '{name}' should include connection_established"
        );
        assert!(
            has_command_output,
            "fixture '{name}' should include at least one command_output"
        );
    }
}

#[test]
fn fixture_normalization_removes_noise_by_default() {
    let normalized = SessionRecorder::normalize_jsonl(NOISY_FIXTURE, NormalizeOptions::default())
        .expect("normalize noisy fixture");
    let recorder = SessionRecorder::from_jsonl(&normalized).expect("parse normalized");
    let entries = recorder.entries().expect("entries");

    assert!(!entries.is_empty());
    assert!(!entries.iter().any(|e| matches!(e.event, SessionEvent::RawChunk { .. })));
    assert!(!entries.iter().any(|e| matches!(e.event, SessionEvent::PrivilegeChanged { .. })));
}
