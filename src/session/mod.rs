//! Components C (Session Coordinator), D (Privilege FSM, as a thin façade
//! over [`privilege`]), and the `Connection` value the rest of the crate is
//! built around.
//!
//! [`Connection`] owns a [`Transport`], a [`ChannelEngine`], and an optional
//! [`PrivilegeTable`] — composition, not the reference implementation's
//! mixin inheritance.

pub mod channel;
pub mod platform;
pub mod privilege;
pub mod recording;
pub mod security;
pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::endpoint::{Credentials, Endpoint};
use crate::error::ConnectError;
use crate::result::CommandResult;

pub use channel::{ChannelEngine, ChannelOptions, DisablePaging, PreLoginHook, restructure, rstrip_lines, strip_ansi};
pub use privilege::{PrivilegeFsm, PrivilegeLevel, PrivilegeTable};
pub use recording::{
    NormalizeOptions, ReplayContext, SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder,
    SessionReplayer,
};
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use transport::{Capability, Transport};

/// How the keepalive task keeps the device-side session from timing out
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveKind {
    /// Periodic no-op bytes through the interactive channel, guarded by the
    /// session mutex.
    Network,
    /// The SSH library's native protocol-level keepalive (primary transport
    /// only; see [`Capability::StandardKeepalive`]).
    Standard,
}

/// Session-level configuration (`SessionOptions`).
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// `0`/`None` means block indefinitely on a single read.
    pub session_read_timeout: Option<Duration>,
    pub keepalive_enabled: bool,
    pub keepalive_interval: Duration,
    pub keepalive_kind: KeepaliveKind,
    /// Default `0x05` (Ctrl-E) — a no-op on most CLIs.
    pub keepalive_pattern: Vec<u8>,
    pub use_fallback_transport: bool,
    /// Fail-fast host-syntax validation.
    pub validate_host: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            session_read_timeout: Some(Duration::from_secs(30)),
            keepalive_enabled: false,
            keepalive_interval: Duration::from_secs(60),
            keepalive_kind: KeepaliveKind::Network,
            keepalive_pattern: vec![0x05],
            use_fallback_transport: false,
            validate_host: false,
        }
    }
}

impl SessionOptions {
    fn validate(&self) -> Result<(), ConnectError> {
        if self.keepalive_pattern.is_empty() {
            return Err(ConnectError::ValidationError(
                "keepalive_pattern must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Handle to the running keepalive task.
pub struct KeepaliveHandle {
    missed_intervals: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl KeepaliveHandle {
    /// Count of ticks where the session mutex was contended and no
    /// keepalive byte could be written — a metric in place of a log line
    /// tracked instead of only logged.
    pub fn missed_intervals(&self) -> u64 {
        self.missed_intervals.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

fn spawn_keepalive(
    transport: Arc<Transport>,
    session_mutex: Arc<Mutex<()>>,
    options: SessionOptions,
    host: String,
) -> Result<KeepaliveHandle, ConnectError> {
    if options.keepalive_kind == KeepaliveKind::Standard
        && !transport.supports(Capability::StandardKeepalive)
    {
        return Err(ConnectError::RequirementsNotSatisfied(
            "standard keepalive requested but the selected transport does not support it".into(),
        ));
    }

    let missed_intervals = Arc::new(AtomicU64::new(0));
    let task_missed = missed_intervals.clone();

    let task = tokio::spawn(async move {
        let tick = options.keepalive_interval / 10;
        let mut since_last = Duration::ZERO;
        let mut consecutive_contended = 0u32;
        loop {
            tokio::time::sleep(tick.max(Duration::from_millis(100))).await;
            if !transport.is_session_alive() {
                debug!(target: "session", "{host} keepalive task exiting: session no longer alive");
                break;
            }
            since_last += tick;
            if since_last < options.keepalive_interval {
                continue;
            }

            match options.keepalive_kind {
                KeepaliveKind::Network => match session_mutex.try_lock() {
                    Ok(_guard) => {
                        if let Err(e) = transport.write(&options.keepalive_pattern).await {
                            warn!(target: "session", "{host} keepalive write failed: {e}");
                        }
                        since_last = Duration::ZERO;
                        consecutive_contended = 0;
                    }
                    Err(_) => {
                        consecutive_contended += 1;
                        task_missed.fetch_add(1, Ordering::Relaxed);
                        if consecutive_contended >= 3 {
                            warn!(
                                target: "session",
                                "{host} keepalive contended for {consecutive_contended} consecutive intervals"
                            );
                        }
                    }
                },
                KeepaliveKind::Standard => {
                    if let Err(e) = transport.keepalive_send().await {
                        warn!(target: "session", "{host} standard keepalive failed: {e}");
                    }
                    since_last = Duration::ZERO;
                }
            }
        }
    });

    Ok(KeepaliveHandle {
        missed_intervals,
        task,
    })
}

/// The public façade: owns Transport, ChannelEngine, and an optional
/// PrivilegeTable.
pub struct Connection {
    endpoint: Endpoint,
    credentials: Credentials,
    session_options: SessionOptions,
    channel_options: ChannelOptions,
    security_options: ConnectionSecurityOptions,
    privilege_table: Option<PrivilegeTable>,
    config_privilege_name: String,
    recorder: Option<SessionRecorder>,
    platform_id: String,
    structured_parser: Option<StructuredParser>,

    transport: Option<Arc<Transport>>,
    channel: Option<ChannelEngine>,
    session_mutex: Arc<Mutex<()>>,
    keepalive: Option<KeepaliveHandle>,
}

/// Structured-output hook signature: `parse(platform, command,
/// rawOutput) -> json`. `None` yields the empty map for every command.
pub type StructuredParser = Arc<dyn Fn(&str, &str, &str) -> serde_json::Value + Send + Sync>;

impl Connection {
    /// Validates all constructor arguments synchronously, failing
    /// fast with `ValidationError` before any I/O is attempted.
    pub fn new(
        endpoint: Endpoint,
        credentials: Credentials,
        session_options: SessionOptions,
        channel_options: ChannelOptions,
    ) -> Result<Self, ConnectError> {
        Self::with_privilege_table(endpoint, credentials, session_options, channel_options, None, "configuration")
    }

    /// Construct a platform-aware connection (adds `acquirePrivilege`).
    pub fn with_privilege_table(
        endpoint: Endpoint,
        credentials: Credentials,
        session_options: SessionOptions,
        channel_options: ChannelOptions,
        privilege_table: Option<PrivilegeTable>,
        config_privilege_name: impl Into<String>,
    ) -> Result<Self, ConnectError> {
        endpoint.validate(session_options.validate_host)?;
        credentials.validate()?;
        session_options.validate()?;
        // Fail fast on a bad prompt regex ("the single most important
        // value; an incorrect value causes every read to hang until
        // timeout").
        channel_options.compile_prompt_regex()?;

        Ok(Self {
            endpoint,
            credentials,
            session_options,
            channel_options,
            security_options: ConnectionSecurityOptions::default(),
            privilege_table,
            config_privilege_name: config_privilege_name.into(),
            recorder: None,
            platform_id: "unknown".to_string(),
            structured_parser: None,
            transport: None,
            channel: None,
            session_mutex: Arc::new(Mutex::new(())),
            keepalive: None,
        })
    }

    pub fn with_security_options(mut self, security_options: ConnectionSecurityOptions) -> Self {
        self.security_options = security_options;
        self
    }

    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Install the optional structured-output parsing hook. `platform`
    /// is the driver identifier passed to the parser (e.g. `"cisco_ios"`).
    pub fn with_structured_parser(mut self, platform: impl Into<String>, parser: StructuredParser) -> Self {
        self.platform_id = platform.into();
        self.structured_parser = Some(parser);
        self
    }

    fn host_label(&self) -> String {
        format!("{}@{}:{}", self.credentials.user, self.endpoint.host, self.endpoint.port)
    }

    /// Socket → SSH handshake → auth → channel → shell → optional
    /// `pre_login_hook` → optional `disable_paging` → optional keepalive.
    pub async fn open(&mut self) -> Result<(), ConnectError> {
        let host = self.host_label();
        debug!(target: "session", "{host} opening connection");

        let transport = match Transport::connect(
            self.session_options.use_fallback_transport,
            &self.endpoint,
            &self.credentials,
            &self.security_options,
            self.session_options.session_read_timeout,
        )
        .await
        {
            Ok(t) => Arc::new(t),
            Err(e) => {
                warn!(target: "session", "{host} open() failed: {e}");
                return Err(e);
            }
        };

        let channel = match ChannelEngine::new(
            transport.clone(),
            self.channel_options.clone(),
            host.clone(),
            self.session_mutex.clone(),
            self.session_options.session_read_timeout,
        ) {
            Ok(c) => c,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e);
            }
        };

        if let Some(hook) = &self.channel_options.pre_login_hook {
            hook(&channel);
        }

        match &self.channel_options.disable_paging {
            DisablePaging::Command(cmd) => {
                if let Err(e) = channel.send_input(cmd, true).await {
                    let _ = transport.close().await;
                    return Err(e);
                }
            }
            DisablePaging::Callback(cb) => {
                if let Some(cmd) = cb(&channel) {
                    if let Err(e) = channel.send_input(&cmd, true).await {
                        let _ = transport.close().await;
                        return Err(e);
                    }
                }
            }
            DisablePaging::None => {}
        }

        self.transport = Some(transport.clone());
        self.channel = Some(channel);

        if self.session_options.keepalive_enabled {
            self.keepalive = Some(spawn_keepalive(
                transport,
                self.session_mutex.clone(),
                self.session_options.clone(),
                host.clone(),
            )?);
        }

        if let Some(recorder) = &self.recorder {
            let prompt_after = self.get_prompt().await.unwrap_or_default();
            let _ = recorder.record_event(SessionEvent::ConnectionEstablished {
                host: host.clone(),
                prompt_after,
                privilege_after: String::new(),
            });
        }

        debug!(target: "session", "{host} connection open");
        Ok(())
    }

    /// Tears down channel, session, socket in reverse order; safe to
    /// call on a never-opened or already-closed connection.
    pub async fn close(&mut self) -> Result<(), ConnectError> {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.stop();
        }
        if let Some(transport) = self.transport.take() {
            transport.close().await?;
        }
        self.channel = None;
        if let Some(recorder) = &self.recorder {
            let _ = recorder.record_event(SessionEvent::ConnectionClosed {
                reason: "closed by caller".into(),
                prompt_before: None,
            });
        }
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_session_alive() && t.is_channel_alive())
    }

    /// Missed keepalive intervals, `0` if keepalive is disabled.
    pub fn keepalive_missed_intervals(&self) -> u64 {
        self.keepalive.as_ref().map(|k| k.missed_intervals()).unwrap_or(0)
    }

    fn channel(&self) -> Result<&ChannelEngine, ConnectError> {
        self.channel.as_ref().ok_or(ConnectError::ConnectClosedError)
    }

    fn privilege_fsm(&self) -> Result<PrivilegeFsm<'_>, ConnectError> {
        let table = self
            .privilege_table
            .as_ref()
            .ok_or_else(|| ConnectError::ValidationError("connection has no privilege table".into()))?;
        Ok(PrivilegeFsm::new(
            table,
            self.channel()?,
            self.credentials.secondary_password.as_deref(),
            &self.config_privilege_name,
        ))
    }

    /// `sendCommands`. Routes through the privilege FSM when a
    /// privilege table was supplied at construction; otherwise sends
    /// directly at whatever level the shell happens to be in.
    pub async fn send_commands(
        &self,
        inputs: &[String],
        strip_prompt: bool,
        parse_structured: bool,
    ) -> Result<Vec<CommandResult>, ConnectError> {
        let mut results = if self.privilege_table.is_some() {
            self.privilege_fsm()?.send_commands(inputs, strip_prompt).await?
        } else {
            let channel = self.channel()?;
            let mut out = Vec::with_capacity(inputs.len());
            for input in inputs {
                out.push(channel.send_input(input, strip_prompt).await?);
            }
            out
        };

        if parse_structured {
            for result in &mut results {
                result.structured_output = match &self.structured_parser {
                    Some(parse) => parse(&self.platform_id, &result.input, &result.raw_output),
                    None => serde_json::Value::Object(Default::default()),
                };
            }
        }

        if let Some(recorder) = &self.recorder {
            for result in &results {
                let _ = recorder.record_command(result, &self.config_privilege_name, true);
            }
        }

        Ok(results)
    }

    /// `sendConfigs`: requires a privilege table (configuration mode is
    /// a privilege-level concept).
    pub async fn send_configs(&self, inputs: &[String], strip_prompt: bool) -> Result<Vec<CommandResult>, ConnectError> {
        self.privilege_fsm()?.send_configs(inputs, strip_prompt).await
    }

    /// `sendInteract`.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_interact(
        &self,
        interactions: &[(String, String, String, String)],
        strip_prompt: bool,
        hide_response: bool,
    ) -> Result<Vec<CommandResult>, ConnectError> {
        let channel = self.channel()?;
        let mut out = Vec::with_capacity(interactions.len());
        for (input, expect, response, finale) in interactions {
            out.push(
                channel
                    .send_interact(input, expect, response, finale, strip_prompt, hide_response)
                    .await?,
            );
        }
        Ok(out)
    }

    /// `getPrompt`.
    pub async fn get_prompt(&self) -> Result<String, ConnectError> {
        self.channel()?.get_prompt().await
    }

    /// `openAndExecute` (primary transport only).
    pub async fn open_and_execute(&self, cmd: &str) -> Result<String, ConnectError> {
        self.channel()?.open_and_execute(cmd).await
    }

    /// `acquirePrivilege` (requires a privilege table).
    pub async fn acquire_privilege(&self, name: &str) -> Result<(), ConnectError> {
        self.privilege_fsm()?.acquire_privilege(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn valid_endpoint() -> Endpoint {
        Endpoint::new("router.lab.example.com", 22, Duration::from_secs(5))
    }

    fn valid_credentials() -> Credentials {
        Credentials::password("admin", "hunter2")
    }

    #[test]
    fn rejects_invalid_prompt_regex_at_construction() {
        let mut channel_options = ChannelOptions::default();
        channel_options.prompt_regex = "(unterminated".to_string();
        let result = Connection::new(
            valid_endpoint(),
            valid_credentials(),
            SessionOptions::default(),
            channel_options,
        );
        assert!(matches!(result, Err(ConnectError::ValidationError(_))));
    }

    #[test]
    fn rejects_empty_keepalive_pattern() {
        let mut session_options = SessionOptions::default();
        session_options.keepalive_pattern.clear();
        let result = Connection::new(
            valid_endpoint(),
            valid_credentials(),
            session_options,
            ChannelOptions::default(),
        );
        assert!(matches!(result, Err(ConnectError::ValidationError(_))));
    }

    #[test]
    fn fresh_connection_is_not_alive() {
        let conn = Connection::new(
            valid_endpoint(),
            valid_credentials(),
            SessionOptions::default(),
            ChannelOptions::default(),
        )
        .unwrap();
        assert!(!conn.is_alive());
        assert_eq!(conn.keepalive_missed_intervals(), 0);
    }
}
