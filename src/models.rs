//! Data models shared by the power-on and power-off paths

use std::fmt;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use reqwest::Url;

/// Cookie name the router expects the session id under
pub const SESSION_COOKIE: &str = "efm_session_id";

const LOGIN_PATH: &str = "/sess-bin/login_handler.cgi";
const LOGIN_REFERER_PATH: &str = "/sess-bin/login_session.cgi?noauto=1";
const TIMEPRO_PATH: &str = "/sess-bin/timepro.cgi";
const WOL_LIST_QUERY: &str = "tmenu=iframe&smenu=expertconfwollist";

/// Router login credentials
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Addresses of the three router interactions, all under one origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterEndpoint {
    origin: String,
}

impl RouterEndpoint {
    /// Build an endpoint from the configured domain, optionally replacing its port
    /// with the router's web admin port.
    pub fn new(domain: &str, wol_port: Option<u16>) -> Result<Self> {
        let mut url =
            Url::parse(domain).with_context(|| format!("Invalid router domain '{}'", domain))?;
        if url.host_str().is_none() {
            bail!("Router domain '{}' has no host", domain);
        }
        if let Some(port) = wol_port {
            if url.set_port(Some(port)).is_err() {
                bail!("Cannot set port {} on '{}'", port, domain);
            }
        }
        Ok(Self {
            origin: url.origin().ascii_serialization(),
        })
    }

    /// `scheme://host[:port]` without a trailing slash
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn login_url(&self) -> String {
        format!("{}{}", self.origin, LOGIN_PATH)
    }

    /// Value sent in the login form's `Referer` field
    pub fn login_referer(&self) -> String {
        format!("{}{}", self.origin, LOGIN_REFERER_PATH)
    }

    pub fn list_url(&self) -> String {
        format!("{}{}?{}", self.origin, TIMEPRO_PATH, WOL_LIST_QUERY)
    }

    pub fn wake_url(&self) -> String {
        format!("{}{}", self.origin, TIMEPRO_PATH)
    }
}

/// Session obtained from one login, held as the full `Cookie` header value.
///
/// Never persisted and never shared between two power-on runs.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    cookie: String,
}

impl SessionToken {
    /// Wrap a raw token (or a `; `-joined cookie fragment list) into the canonical
    /// `efm_session_id=<token>` form. Returns `None` for an empty token.
    pub fn from_raw(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let prefix = format!("{}=", SESSION_COOKIE);
        let value = raw.strip_prefix(&prefix).unwrap_or(raw).trim();
        if value.is_empty() {
            return None;
        }
        Some(Self {
            cookie: format!("{}{}", prefix, value),
        })
    }

    /// The token without the cookie name
    pub fn value(&self) -> &str {
        &self.cookie[SESSION_COOKIE.len() + 1..]
    }

    /// Exact value for the `Cookie` request header
    pub fn cookie_header(&self) -> &str {
        &self.cookie
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({} chars)", self.value().len())
    }
}

/// One row of the router's Wake-on-LAN device list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub display_name: String,
    pub hardware_address: String,
}

/// How the SSH session authenticates
#[derive(Clone)]
pub enum SshCredential {
    Password(String),
    /// Identities offered by the running agent (`SSH_AUTH_SOCK`)
    Agent,
    Key {
        private_key: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::Agent => f.write_str("Agent"),
            Self::Key { private_key, .. } => f
                .debug_struct("Key")
                .field("private_key", private_key)
                .finish_non_exhaustive(),
        }
    }
}

/// Machine to shut down
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: SshCredential,
}

impl SshTarget {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Captured output of the remote shutdown command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<i32>,
}

/// Power state reported to hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

/// Where a controller is in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Authenticating,
    Resolving,
    Dispatching,
    ConnectingSsh,
    Executing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Authenticating => "authenticating",
            Self::Resolving => "resolving",
            Self::Dispatching => "dispatching",
            Self::ConnectingSsh => "connecting ssh",
            Self::Executing => "executing",
        };
        f.write_str(name)
    }
}
