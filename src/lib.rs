//! # vtyshell - interactive SSH client for network-device CLIs
//!
//! `vtyshell` drives a network device's interactive SSH shell the way a
//! human operator would: it opens a PTY+shell, sends textual commands,
//! detects completion by recognizing the device's prompt, and returns the
//! command's output. It also automates multi-step "interactive" exchanges
//! (prompts inside prompts) and walks devices between privilege levels
//! (user exec, privileged exec, configuration mode, sub-configuration mode).
//!
//! ## Scope
//!
//! This crate covers three things:
//! 1. The SSH session/channel lifecycle — [`session::transport`] and
//!    [`session`]'s `Connection`.
//! 2. The interactive channel protocol engine — [`session::channel`].
//! 3. The privilege-level state machine — [`session::privilege`] and the
//!    canonical per-vendor tables in [`session::platform`].
//!
//! It is deliberately not an SSH protocol implementation (it relies on
//! `russh`/`async-ssh2-tokio` and `thrussh` as transport libraries), not a
//! configuration-management tool, and not a structured-output parser beyond
//! the pluggable hook in [`session::Connection::with_structured_parser`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vtyshell::endpoint::{Credentials, Endpoint};
//! use vtyshell::session::{ChannelOptions, Connection, SessionOptions, platform};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = Endpoint::new("192.168.1.1", 22, Duration::from_secs(10));
//!     let credentials = Credentials::password("admin", "password")
//!         .with_secondary_password("enable-secret");
//!     let mut channel_options = ChannelOptions::default();
//!     channel_options.prompt_regex = r"[a-z0-9.\-@()/:]{1,32}[#>$]\s*$".to_string();
//!
//!     let mut connection = Connection::with_privilege_table(
//!         endpoint,
//!         credentials,
//!         SessionOptions::default(),
//!         channel_options,
//!         Some(platform::cisco_ios_xe()?),
//!         "configuration",
//!     )?;
//!
//!     connection.open().await?;
//!     let results = connection
//!         .send_commands(&["show version".to_string()], true, false)
//!         .await?;
//!     println!("{}", results[0].raw_output);
//!     connection.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Main components
//!
//! - [`session::Connection`] - the public façade
//! - [`session::channel::ChannelEngine`] - prompt-driven read/write loop
//! - [`session::privilege::PrivilegeFsm`] - privilege-level navigation
//! - [`session::platform`] - canonical per-vendor privilege tables
//! - [`error::ConnectError`] - the crate's error enum
//! - [`endpoint`] - `Endpoint`, `Credentials`, `SshConfigOverride`
//! - [`result::CommandResult`] - the per-command result record

pub mod config;
pub mod endpoint;
pub mod error;
pub mod result;
pub mod session;
