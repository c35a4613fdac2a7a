//! Component B: the interactive channel protocol engine.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;

use crate::error::ConnectError;
use crate::result::CommandResult;
use crate::session::transport::Transport;

/// ANSI escape sequences this engine strips:
/// `ESC ( [@-Z\-_] | '[' [0-?]* [ -/]* [@-~] )`.
static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b(?:[@-Z\\_]|\[[0-?]*[ -/]*[@-~])").expect("static ANSI regex"));

/// What to do after shell invocation and before issuing user commands.
#[derive(Clone)]
pub enum DisablePaging {
    /// Send this literal command once.
    Command(String),
    /// Invoke this callback with the channel engine.
    Callback(Arc<dyn Fn(&ChannelEngine) -> Option<String> + Send + Sync>),
    None,
}

/// A callback run once after shell invocation, before `disable_paging`.
pub type PreLoginHook = Arc<dyn Fn(&ChannelEngine) + Send + Sync>;

/// Channel-level configuration (`ChannelOptions`).
#[derive(Clone)]
pub struct ChannelOptions {
    pub prompt_regex: String,
    pub operation_timeout: Option<Duration>,
    pub return_char: String,
    pub strip_ansi: bool,
    pub pre_login_hook: Option<PreLoginHook>,
    pub disable_paging: DisablePaging,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            prompt_regex: r"[a-z0-9.\-@()/:]{1,32}[#>$]\s*$".to_string(),
            operation_timeout: Some(Duration::from_secs(10)),
            return_char: "\n".to_string(),
            strip_ansi: true,
            pre_login_hook: None,
            disable_paging: DisablePaging::None,
        }
    }
}

impl ChannelOptions {
    /// Compile the prompt regex eagerly (multiline + case-insensitive)
    /// so a bad pattern fails fast at construction rather than on the first
    /// hung read.
    pub(crate) fn compile_prompt_regex(&self) -> Result<Regex, ConnectError> {
        Regex::new(&format!("(?mi){}", self.prompt_regex))
            .map_err(|e| ConnectError::ValidationError(format!("invalid prompt_regex: {e}")))
    }
}

/// An explicit expect/finale target for `read_until_prompt`: a
/// leading `^` or trailing `$` is treated as a regex (compiled with the same
/// flags as the prompt regex); anything else is a plain substring match.
enum MatchTarget<'a> {
    Regex(Regex),
    Substring(&'a str),
}

fn compile_match_target(pattern: &str) -> Result<MatchTarget<'_>, ConnectError> {
    if pattern.starts_with('^') || pattern.ends_with('$') {
        let re = Regex::new(&format!("(?mi){pattern}"))
            .map_err(|e| ConnectError::ValidationError(format!("invalid expect/finale pattern: {e}")))?;
        Ok(MatchTarget::Regex(re))
    } else {
        Ok(MatchTarget::Substring(pattern))
    }
}

/// `rstrip_lines`: decode as UTF-8 (lossily — a network device is not
/// guaranteed to speak strict UTF-8), normalize CRLF/CR to LF, right-trim
/// each line, and rejoin with LF.
pub fn rstrip_lines(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    normalized
        .split('\n')
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `strip_ansi`: remove escape sequences from a raw byte buffer,
/// operating on the lossily-decoded text.
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// `restructure`: drop leading blank lines; optionally remove the
/// final match of the prompt regex.
pub fn restructure(text: &str, prompt_regex: &Regex, strip_prompt: bool) -> String {
    let mut lines: Vec<&str> = text.split('\n').collect();
    while matches!(lines.first(), Some(line) if line.trim().is_empty()) {
        lines.remove(0);
    }
    let mut joined = lines.join("\n");
    if strip_prompt {
        if let Some(m) = prompt_regex.find_iter(&joined).last() {
            let (start, end) = (m.start(), m.end());
            joined = format!("{}{}", &joined[..start], &joined[end..]);
            joined = joined.trim_end_matches('\n').to_string();
        }
    }
    joined
}

/// Retry policy for the inner read primitives: 5 attempts, delay
/// starting at 100ms and doubling.
const INNER_RETRY_ATTEMPTS: u32 = 5;
const INNER_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Component B. Owns no transport state itself — it borrows the connection's
/// [`Transport`] and session mutex — so it can be constructed cheaply and
/// shared between the main operation path and the privilege FSM.
pub struct ChannelEngine {
    pub(crate) transport: Arc<Transport>,
    pub(crate) options: ChannelOptions,
    pub(crate) prompt_regex: Regex,
    pub(crate) host: String,
    /// Serializes writes against the keepalive task.
    pub(crate) session_mutex: Arc<Mutex<()>>,
    /// Per-read timeout passed to every `transport.read()` call.
    /// `None` — or `Some(Duration::ZERO)` — means block indefinitely; this is
    /// the same value handed to `PrimaryTransport::connect`'s
    /// `Ssh2Config.inactivity_timeout`, kept here so the engine's own read
    /// sites honor it too.
    session_read_timeout: Option<Duration>,
}

impl ChannelEngine {
    pub fn new(
        transport: Arc<Transport>,
        options: ChannelOptions,
        host: String,
        session_mutex: Arc<Mutex<()>>,
        session_read_timeout: Option<Duration>,
    ) -> Result<Self, ConnectError> {
        let prompt_regex = options.compile_prompt_regex()?;
        Ok(Self {
            transport,
            options,
            prompt_regex,
            host,
            session_mutex,
            session_read_timeout,
        })
    }

    /// Resolve the configured `session_read_timeout` into the value handed
    /// to `Transport::read`: `None` for "block indefinitely", matching the
    /// `0`/`None` boundary case.
    fn per_read_timeout(&self) -> Option<Duration> {
        match self.session_read_timeout {
            Some(d) if !d.is_zero() => Some(d),
            _ => None,
        }
    }

    /// Inner retry decorator around a fallible read primitive that
    /// signals "no data yet" with `Ok(None)`.
    async fn with_retry<F, Fut, T>(&self, mut attempt: F) -> Result<T, ConnectError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Option<T>, ConnectError>>,
    {
        let mut delay = INNER_RETRY_BASE_DELAY;
        let mut last_timeout_err = None;
        for attempt_no in 0..INNER_RETRY_ATTEMPTS {
            match attempt().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    last_timeout_err = Some(ConnectError::TimeoutError(format!(
                        "read timed out (attempt {}/{INNER_RETRY_ATTEMPTS})",
                        attempt_no + 1
                    )));
                    if !self.transport.is_channel_alive() {
                        return Err(ConnectError::ChannelDisconnectError);
                    }
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_timeout_err.unwrap_or(ConnectError::TimeoutError("read retry budget exhausted".into())))
    }

    /// `readUntilInput`: suppress the device's echo of `expected`.
    async fn read_until_input(&self, expected: &str) -> Result<(), ConnectError> {
        let mut buffer = String::new();
        self.with_retry(|| async {
            match self.transport.read(self.per_read_timeout()).await? {
                None => Ok(None),
                Some(chunk) => {
                    let text = if self.options.strip_ansi {
                        strip_ansi(&String::from_utf8_lossy(&chunk))
                    } else {
                        String::from_utf8_lossy(&chunk).into_owned()
                    };
                    buffer.push_str(&text);
                    if buffer.contains(expected) {
                        Ok(Some(()))
                    } else {
                        Ok(None)
                    }
                }
            }
        })
        .await?;
        self.transport.flush().await?;
        self.transport.write(self.options.return_char.as_bytes()).await?;
        Ok(())
    }

    /// `readUntilPrompt`.
    async fn read_until_prompt(&self, expect: Option<&str>) -> Result<String, ConnectError> {
        let target = expect.map(compile_match_target).transpose()?;
        let mut buffer = String::new();
        self.with_retry(|| async {
            match self.transport.read(self.per_read_timeout()).await? {
                None => Ok(None),
                Some(chunk) => {
                    let mut text = String::from_utf8_lossy(&chunk).into_owned();
                    if self.options.strip_ansi {
                        text = strip_ansi(&text);
                    }
                    buffer.push_str(&text);
                    let normalized = buffer.replace('\r', "");
                    let matched = match &target {
                        None => self.prompt_regex.is_match(&normalized),
                        Some(MatchTarget::Regex(re)) => re.is_match(&normalized),
                        Some(MatchTarget::Substring(s)) => normalized.contains(s),
                    };
                    if matched { Ok(Some(())) } else { Ok(None) }
                }
            }
        })
        .await?;
        Ok(rstrip_lines(buffer.as_bytes()))
    }

    /// `sendInput`.
    pub async fn send_input(&self, input: &str, strip_prompt: bool) -> Result<CommandResult, ConnectError> {
        let budget = self.options.operation_timeout;
        let body = self.send_input_inner(input, strip_prompt);
        match budget {
            None => body.await,
            Some(d) => tokio::time::timeout(d, body)
                .await
                .map_err(|_| ConnectError::TimeoutError(format!("sendCommands({input:?}) exceeded {d:?}")))?,
        }
    }

    async fn send_input_inner(&self, input: &str, strip_prompt: bool) -> Result<CommandResult, ConnectError> {
        let _guard = self.session_mutex.lock().await;
        let start_time = SystemTime::now();
        debug!(target: "channel.admin", "{} sending {:?}", self.host, input);

        self.transport.flush().await?;
        self.transport.write(input.as_bytes()).await?;
        self.read_until_input(input).await?;
        let raw = self.read_until_prompt(None).await?;

        let mut result = CommandResult::new(self.host.clone(), input.to_string(), String::new(), start_time);
        result.raw_output = restructure(&raw, &self.prompt_regex, strip_prompt);
        result.end_time = SystemTime::now();
        Ok(result)
    }

    /// `sendInteract`.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_interact(
        &self,
        input: &str,
        expect: &str,
        response: &str,
        finale: &str,
        strip_prompt: bool,
        hide_response: bool,
    ) -> Result<CommandResult, ConnectError> {
        let budget = self.options.operation_timeout;
        let body = self.send_interact_inner(input, expect, response, finale, strip_prompt, hide_response);
        match budget {
            None => body.await,
            Some(d) => tokio::time::timeout(d, body)
                .await
                .map_err(|_| ConnectError::TimeoutError(format!("sendInteract({input:?}) exceeded {d:?}")))?,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_interact_inner(
        &self,
        input: &str,
        expect: &str,
        response: &str,
        finale: &str,
        strip_prompt: bool,
        hide_response: bool,
    ) -> Result<CommandResult, ConnectError> {
        let _guard = self.session_mutex.lock().await;
        let start_time = SystemTime::now();
        debug!(
            target: "channel.admin",
            "{} interact {:?} (response {})",
            self.host,
            input,
            if hide_response { "hidden" } else { "visible" }
        );

        self.transport.flush().await?;
        self.transport.write(input.as_bytes()).await?;
        self.read_until_input(input).await?;
        let mut raw = self.read_until_prompt(Some(expect)).await?;

        if response.is_empty() || hide_response {
            raw.push_str(&self.options.return_char);
        }

        self.transport.write(response.as_bytes()).await?;
        self.transport.write(self.options.return_char.as_bytes()).await?;

        // An empty `finale` means "the connection's default prompt regex" —
        // used when the caller (e.g. the privilege FSM) doesn't need a
        // more specific interim prompt.
        let tail = if finale.is_empty() {
            self.read_until_prompt(None).await?
        } else {
            self.read_until_prompt(Some(finale)).await?
        };
        raw.push_str(&tail);

        let mut result = CommandResult::new(self.host.clone(), input.to_string(), String::new(), start_time);
        result.raw_output = restructure(&raw, &self.prompt_regex, strip_prompt);
        result.end_time = SystemTime::now();
        Ok(result)
    }

    /// `getPrompt`: nudge the device with a bare return and read
    /// back the matched prompt text, honoring the configured session read
    /// timeout like every other read site.
    pub async fn get_prompt(&self) -> Result<String, ConnectError> {
        let _guard = self.session_mutex.lock().await;
        self.transport.write(self.options.return_char.as_bytes()).await?;

        let mut buffer = String::new();
        let found = self
            .with_retry(|| async {
                match self.transport.read(self.per_read_timeout()).await? {
                    None => Ok(None),
                    Some(chunk) => {
                        let mut text = String::from_utf8_lossy(&chunk).into_owned();
                        if self.options.strip_ansi {
                            text = strip_ansi(&text);
                        }
                        buffer.push_str(&text);
                        let normalized = buffer.replace('\r', "");
                        if let Some(m) = self.prompt_regex.find_iter(&normalized).last() {
                            Ok(Some(m.as_str().to_string()))
                        } else {
                            Ok(None)
                        }
                    }
                }
            })
            .await?;
        trace!(target: "channel.raw", "{} prompt {:?}", self.host, found);
        Ok(found)
    }

    /// `openAndExecute`.
    pub async fn open_and_execute(&self, cmd: &str) -> Result<String, ConnectError> {
        self.transport.open_and_execute(cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_re() -> Regex {
        Regex::new(r"(?mi)[a-z0-9.\-@()/:]{1,32}[#>$]\s*$").unwrap()
    }

    #[test]
    fn rstrip_lines_trims_trailing_whitespace_per_line() {
        let raw = b"show version\r\nCisco IOS XE Version 16.9.1   \r\nRouter#";
        assert_eq!(
            rstrip_lines(raw),
            "show version\nCisco IOS XE Version 16.9.1\nRouter#"
        );
    }

    #[test]
    fn strip_ansi_removes_escape_sequences() {
        let text = "\x1b[1m/\x1b[0;0mRouter#";
        let cleaned = strip_ansi(text);
        assert_eq!(cleaned, "/Router#");
        assert!(!cleaned.contains('\x1b'));
    }

    #[test]
    fn restructure_drops_leading_blank_lines_and_trailing_prompt() {
        let re = prompt_re();
        let text = "\n\nCisco IOS XE Version 16.9.1\nRouter#";
        assert_eq!(restructure(text, &re, true), "Cisco IOS XE Version 16.9.1");
    }

    #[test]
    fn restructure_keeps_prompt_when_not_stripping() {
        let re = prompt_re();
        let text = "Cisco IOS XE Version 16.9.1\nRouter#";
        assert_eq!(
            restructure(text, &re, false),
            "Cisco IOS XE Version 16.9.1\nRouter#"
        );
    }

    #[test]
    fn restructured_output_never_contains_full_prompt_match_when_stripped() {
        let re = prompt_re();
        let text = "show version\nCisco IOS XE Version 16.9.1\nRouter#";
        let out = restructure(text, &re, true);
        assert!(!re.is_match(&out));
    }

    #[test]
    fn match_target_treats_caret_and_dollar_as_regex() {
        assert!(matches!(compile_match_target("^Password:").unwrap(), MatchTarget::Regex(_)));
        assert!(matches!(compile_match_target("Router#$").unwrap(), MatchTarget::Regex(_)));
        assert!(matches!(
            compile_match_target("Clear logging buffer [confirm]").unwrap(),
            MatchTarget::Substring(_)
        ));
    }
}
