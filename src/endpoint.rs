//! Endpoint, credential, and SSH-config-override value types.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::ConnectError;

/// Where to dial and how long to wait for the TCP handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }

    /// `host` non-empty, stripped; when `validate_host` is requested,
    /// it must be a parseable IP *or* a syntactically plausible DNS name.
    pub(crate) fn validate(&self, validate_host: bool) -> Result<(), ConnectError> {
        let trimmed = self.host.trim();
        if trimmed.is_empty() {
            return Err(ConnectError::ValidationError("host must not be empty".into()));
        }
        if validate_host && trimmed.parse::<IpAddr>().is_err() && !is_plausible_dns_name(trimmed) {
            return Err(ConnectError::ValidationError(format!(
                "host {trimmed:?} is neither a parseable IP address nor a resolvable DNS name"
            )));
        }
        Ok(())
    }
}

/// A conservative DNS-name syntax check: labels of `[a-zA-Z0-9-]`, no empty
/// labels, no leading/trailing hyphen per label, overall length <= 253.
fn is_plausible_dns_name(host: &str) -> bool {
    if host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Authentication material for a connection.
///
/// `Debug` never prints `password`, `secondary_password`, or key material —
/// only whether each is present — so credentials can't leak into logs or
/// panics.
#[derive(Clone, Default)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
    /// Enable/secondary password used by the Privilege FSM for
    /// escalate transitions that require secondary authentication.
    pub secondary_password: Option<String>,
}

impl Credentials {
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Some(password.into()),
            private_key_path: None,
            secondary_password: None,
        }
    }

    pub fn private_key(user: impl Into<String>, private_key_path: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: None,
            private_key_path: Some(private_key_path.into()),
            secondary_password: None,
        }
    }

    pub fn with_secondary_password(mut self, secondary: impl Into<String>) -> Self {
        self.secondary_password = Some(secondary.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConnectError> {
        if self.user.trim().is_empty() {
            return Err(ConnectError::ValidationError("user must not be empty".into()));
        }
        if self.password.is_none() && self.private_key_path.is_none() {
            return Err(ConnectError::ValidationError(
                "at least one of password or private_key_path must be set".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field(
                "secondary_password",
                &self.secondary_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// A resolved override from a single `~/.ssh/config` host entry.
///
/// Parsing the config file's grammar is an external collaborator's job; the
/// core only applies the precedence rule that an override may replace
/// `port`, `user`, and `identity_file`, but never the configured password.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshConfigOverride {
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_file: Option<String>,
}

impl SshConfigOverride {
    /// Apply this override to an `(endpoint, credentials)` pair, returning
    /// the effective values. The password field of `credentials` is never
    /// touched.
    pub fn apply(&self, mut endpoint: Endpoint, mut credentials: Credentials) -> (Endpoint, Credentials) {
        if let Some(port) = self.port {
            endpoint.port = port;
        }
        if let Some(user) = &self.user {
            credentials.user = user.clone();
        }
        if let Some(identity_file) = &self.identity_file {
            credentials.private_key_path = Some(identity_file.clone());
        }
        (endpoint, credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_host() {
        let endpoint = Endpoint::new("   ", 22, Duration::from_secs(5));
        assert!(matches!(
            endpoint.validate(false),
            Err(ConnectError::ValidationError(_))
        ));
    }

    #[test]
    fn accepts_ip_when_validation_requested() {
        let endpoint = Endpoint::new("192.168.1.1", 22, Duration::from_secs(5));
        assert!(endpoint.validate(true).is_ok());
    }

    #[test]
    fn accepts_plausible_dns_name() {
        let endpoint = Endpoint::new("router.lab.example.com", 22, Duration::from_secs(5));
        assert!(endpoint.validate(true).is_ok());
    }

    #[test]
    fn rejects_malformed_dns_name() {
        let endpoint = Endpoint::new("-bad-.example..com", 22, Duration::from_secs(5));
        assert!(endpoint.validate(true).is_err());
    }

    #[test]
    fn credentials_debug_redacts_secrets() {
        let creds = Credentials::password("admin", "hunter2").with_secondary_password("enable123");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("enable123"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn ssh_config_override_never_touches_password() {
        let endpoint = Endpoint::new("router", 22, Duration::from_secs(5));
        let credentials = Credentials::password("admin", "secret");
        let override_ = SshConfigOverride {
            port: Some(2222),
            user: Some("netops".into()),
            identity_file: Some("/home/netops/.ssh/id_ed25519".into()),
        };

        let (endpoint, credentials) = override_.apply(endpoint, credentials);
        assert_eq!(endpoint.port, 2222);
        assert_eq!(credentials.user, "netops");
        assert_eq!(credentials.password.as_deref(), Some("secret"));
        assert_eq!(
            credentials.private_key_path.as_deref(),
            Some("/home/netops/.ssh/id_ed25519")
        );
    }
}
