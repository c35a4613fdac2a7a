//! Ambient test tooling: an offline
//! session-recording/replay harness so channel-engine and privilege-FSM
//! behavior can be exercised in tests without a live device.
//!
//! Grounded in the reference implementation's own recording module, with the
//! event schema adapted from a command/mode log to this crate's domain:
//! connections, sent inputs, and privilege-level transitions.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;
use crate::result::CommandResult;

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only (connection lifecycle, command I/O).
    KeyEventsOnly,
    /// Record key events and raw chunks.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep raw shell chunk events.
    pub keep_raw_chunks: bool,
    /// Keep privilege-changed events.
    pub keep_privilege_changed: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_chunks: false,
            keep_privilege_changed: true,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        host: String,
        prompt_after: String,
        privilege_after: String,
    },
    ConnectionClosed {
        reason: String,
        #[serde(default)]
        prompt_before: Option<String>,
    },
    CommandOutput {
        input: String,
        privilege: String,
        #[serde(default)]
        prompt_before: Option<String>,
        #[serde(default)]
        prompt_after: Option<String>,
        success: bool,
        raw_output: String,
    },
    PrivilegeChanged {
        privilege: String,
    },
    RawChunk {
        data: String,
    },
}

/// In-memory session recorder.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    fn now_ms() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    }

    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConnectError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        if self.level == SessionRecordLevel::KeyEventsOnly && matches!(event, SessionEvent::RawChunk { .. }) {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| ConnectError::InternalError("session recorder lock poisoned".into()))?;
        guard.push(SessionRecordEntry {
            ts_ms: Self::now_ms(),
            event,
        });
        Ok(())
    }

    /// Record a completed command as a `CommandOutput` event.
    pub fn record_command(&self, result: &CommandResult, privilege: &str, success: bool) -> Result<(), ConnectError> {
        self.record_event(SessionEvent::CommandOutput {
            input: result.input.clone(),
            privilege: privilege.to_string(),
            prompt_before: None,
            prompt_after: None,
            success,
            raw_output: result.raw_output.clone(),
        })
    }

    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        self.entries
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| ConnectError::InternalError("session recorder lock poisoned".into()))
    }

    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        let entries = self.entries()?;
        let mut out = String::new();
        for entry in entries {
            let line = serde_json::to_string(&entry)
                .map_err(|e| ConnectError::InternalError(format!("failed to serialize entry: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn from_jsonl(content: &str) -> Result<Self, ConnectError> {
        let recorder = Self::new(SessionRecordLevel::Full);
        let mut guard = recorder
            .entries
            .lock()
            .map_err(|_| ConnectError::InternalError("session recorder lock poisoned".into()))?;
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line)
                .map_err(|e| ConnectError::ReplayMismatchError(format!("invalid JSONL at line {idx}: {e}")))?;
            guard.push(entry);
        }
        Ok(recorder)
    }

    /// Normalize a raw JSONL recording into a stable fixture: drop noisy
    /// event kinds the caller doesn't want, per `options`.
    pub fn normalize_jsonl(content: &str, options: NormalizeOptions) -> Result<String, ConnectError> {
        let recorder = Self::from_jsonl(content)?;
        let entries = recorder.entries()?;
        let mut out = String::new();
        for entry in entries {
            let keep = match &entry.event {
                SessionEvent::RawChunk { .. } => options.keep_raw_chunks,
                SessionEvent::PrivilegeChanged { .. } => options.keep_privilege_changed,
                _ => true,
            };
            if !keep {
                continue;
            }
            let line = serde_json::to_string(&entry)
                .map_err(|e| ConnectError::InternalError(format!("failed to serialize entry: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}

/// The connection context recovered from a fixture's first
/// `ConnectionEstablished` event.
#[derive(Debug, Clone)]
pub struct ReplayContext {
    pub host: String,
    pub prompt: String,
    pub privilege: String,
}

/// Replays a recorded JSONL session offline, standing in for a live
/// [`crate::session::Connection`] in tests.
pub struct SessionReplayer {
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
}

impl SessionReplayer {
    pub fn from_jsonl(content: &str) -> Result<Self, ConnectError> {
        let recorder = SessionRecorder::from_jsonl(content)?;
        Ok(Self {
            entries: recorder.entries()?,
            cursor: 0,
        })
    }

    pub fn initial_context(&self) -> Result<ReplayContext, ConnectError> {
        for entry in &self.entries {
            if let SessionEvent::ConnectionEstablished {
                host,
                prompt_after,
                privilege_after,
            } = &entry.event
            {
                return Ok(ReplayContext {
                    host: host.clone(),
                    prompt: prompt_after.clone(),
                    privilege: privilege_after.clone(),
                });
            }
        }
        Err(ConnectError::ReplayMismatchError(
            "fixture has no connection_established event".into(),
        ))
    }

    /// Replay the next `CommandOutput` event matching `input` within
    /// `privilege`, case-insensitively on the privilege name — mirroring the
    /// channel engine's own substring/regex leniency.
    pub fn replay_next_in_privilege(&mut self, input: &str, privilege: &str) -> Result<CommandResult, ConnectError> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;
            if let SessionEvent::CommandOutput {
                input: recorded_input,
                privilege: recorded_privilege,
                success,
                raw_output,
                ..
            } = &entry.event
            {
                if recorded_input != input {
                    continue;
                }
                if !recorded_privilege.eq_ignore_ascii_case(privilege) {
                    return Err(ConnectError::ReplayMismatchError(format!(
                        "fixture recorded {input:?} under privilege {recorded_privilege:?}, expected {privilege:?}"
                    )));
                }
                if !success {
                    return Err(ConnectError::ReplayMismatchError(format!(
                        "fixture recorded a failed command for {input:?}: {raw_output}"
                    )));
                }
                return Ok(CommandResult::new(
                    String::new(),
                    input.to_string(),
                    raw_output.clone(),
                    SystemTime::now(),
                ));
            }
        }
        Err(ConnectError::ReplayMismatchError(format!(
            "no recorded command_output for {input:?} in privilege {privilege:?}"
        )))
    }

    /// Replay an entire command script, resetting the cursor first so a
    /// fixture can be replayed more than once.
    pub fn replay_script(&mut self, script: &[(String, String)]) -> Result<Vec<CommandResult>, ConnectError> {
        self.cursor = 0;
        let mut out = Vec::with_capacity(script.len());
        for (privilege, input) in script {
            out.push(self.replay_next_in_privilege(input, privilege)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result(input: &str, raw_output: &str) -> CommandResult {
        CommandResult::new("admin@router:22".into(), input.into(), raw_output.into(), SystemTime::now())
    }

    #[test]
    fn recorder_off_records_nothing() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Off);
        recorder
            .record_event(SessionEvent::RawChunk { data: "x".into() })
            .unwrap();
        assert!(recorder.entries().unwrap().is_empty());
    }

    #[test]
    fn key_events_only_drops_raw_chunks() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
        recorder
            .record_event(SessionEvent::RawChunk { data: "x".into() })
            .unwrap();
        recorder
            .record_command(&sample_result("show version", "Cisco IOS XE"), "privilegeExec", true)
            .unwrap();
        let entries = recorder.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].event, SessionEvent::CommandOutput { .. }));
    }

    #[test]
    fn roundtrip_jsonl() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder
            .record_event(SessionEvent::ConnectionEstablished {
                host: "admin@router:22".into(),
                prompt_after: "Router#".into(),
                privilege_after: "privilegeExec".into(),
            })
            .unwrap();
        let jsonl = recorder.to_jsonl().unwrap();
        let replayed = SessionRecorder::from_jsonl(&jsonl).unwrap();
        assert_eq!(replayed.entries().unwrap().len(), 1);
    }

    #[test]
    fn normalize_drops_raw_chunks_by_default() {
        let jsonl = concat!(
            r#"{"ts_ms":1,"event":{"kind":"connection_established","host":"admin@router:22","prompt_after":"Router#","privilege_after":"privilegeExec"}}"#,
            "\n",
            r#"{"ts_ms":2,"event":{"kind":"raw_chunk","data":"junk"}}"#,
            "\n",
        );
        let normalized = SessionRecorder::normalize_jsonl(jsonl, NormalizeOptions::default()).unwrap();
        assert!(!normalized.contains("raw_chunk"));
        assert!(normalized.contains("connection_established"));
    }

    const BASIC_FIXTURE: &str = concat!(
        r#"{"ts_ms":1,"event":{"kind":"connection_established","host":"admin@192.168.1.1:22","prompt_after":"Router#","privilege_after":"privilegeExec"}}"#,
        "\n",
        r#"{"ts_ms":2,"event":{"kind":"command_output","input":"show version","privilege":"privilegeExec","success":true,"raw_output":"Cisco IOS XE Version 16.9.1"}}"#,
        "\n",
    );

    #[test]
    fn replayer_exposes_initial_context() {
        let replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).unwrap();
        let ctx = replayer.initial_context().unwrap();
        assert_eq!(ctx.prompt, "Router#");
        assert_eq!(ctx.privilege, "privilegeExec");
    }

    #[test]
    fn replayer_replays_matching_script() {
        let mut replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).unwrap();
        let script = vec![("privilegeExec".to_string(), "show version".to_string())];
        let results = replayer.replay_script(&script).unwrap();
        assert_eq!(results[0].raw_output, "Cisco IOS XE Version 16.9.1");
    }

    #[test]
    fn replayer_reports_mismatch_for_wrong_privilege() {
        let mut replayer = SessionReplayer::from_jsonl(BASIC_FIXTURE).unwrap();
        let err = replayer.replay_next_in_privilege("show version", "configuration").unwrap_err();
        assert!(matches!(err, ConnectError::ReplayMismatchError(_)));
    }
}
