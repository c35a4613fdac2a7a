//! The per-command result record (component E).

use std::time::SystemTime;

/// An immutable record of one command's execution.
///
/// Created when a command begins (`start_time`) and finalized once its
/// prompt is seen (`raw_output`, `end_time`). Never mutated after being
/// handed back to the caller, except that `structured_output` may be filled
/// in by the optional parsing hook before hand-off.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// `user@host:port` the command was sent to.
    pub host: String,
    /// The exact input that was sent (without the trailing return char).
    pub input: String,
    /// Output with echo and (optionally) the trailing prompt removed.
    pub raw_output: String,
    /// Output of the structured-output hook, or an empty object when no
    /// hook is installed or none matched.
    pub structured_output: serde_json::Value,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
}

impl CommandResult {
    pub(crate) fn new(host: String, input: String, raw_output: String, start_time: SystemTime) -> Self {
        Self {
            host,
            input,
            raw_output,
            structured_output: serde_json::Value::Object(Default::default()),
            start_time,
            end_time: SystemTime::now(),
        }
    }
}
