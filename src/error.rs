//! Failure taxonomy for both power transitions

use thiserror::Error;

use crate::models::Phase;

/// Transport-level failure of a single router request
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session token not found in login response")]
    SessionTokenNotFound,

    #[error("login request failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no device named \"{0}\" in the Wake-on-LAN list")]
    DeviceNotFound(String),

    #[error("malformed Wake-on-LAN list: {0}")]
    MalformedListing(String),

    #[error("device list request failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("wake request failed: {0}")]
    TransportFailure(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("SSH connection failed: {0}")]
    ConnectFailed(String),

    #[error("could not start remote command: {0}")]
    ExecFailed(String),

    #[error("remote stream closed abnormally: {0}")]
    StreamError(String),

    #[error("remote command exited with status {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },

    #[error("SSH operation timed out while {0}")]
    Timeout(Phase),
}

/// Error returned by `PowerController` operations
#[derive(Debug, Error)]
pub enum PowerError {
    #[error(transparent)]
    Auth(AuthError),

    #[error(transparent)]
    Resolve(ResolveError),

    #[error(transparent)]
    Dispatch(DispatchError),

    #[error(transparent)]
    Shutdown(ShutdownError),

    #[error("timed out while {phase}")]
    Timeout { phase: Phase },
}

impl PowerError {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Auth(_) => Phase::Authenticating,
            Self::Resolve(_) => Phase::Resolving,
            Self::Dispatch(_) => Phase::Dispatching,
            Self::Shutdown(ShutdownError::ConnectFailed(_)) => Phase::ConnectingSsh,
            Self::Shutdown(_) => Phase::Executing,
            Self::Timeout { phase } => *phase,
        }
    }
}

impl From<AuthError> for PowerError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Transport(ref t) if t.is_timeout() => Self::Timeout {
                phase: Phase::Authenticating,
            },
            other => Self::Auth(other),
        }
    }
}

impl From<ResolveError> for PowerError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Transport(ref t) if t.is_timeout() => Self::Timeout {
                phase: Phase::Resolving,
            },
            other => Self::Resolve(other),
        }
    }
}

impl From<DispatchError> for PowerError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::TransportFailure(ref t) if t.is_timeout() => Self::Timeout {
                phase: Phase::Dispatching,
            },
            other => Self::Dispatch(other),
        }
    }
}

impl From<ShutdownError> for PowerError {
    fn from(e: ShutdownError) -> Self {
        match e {
            ShutdownError::Timeout(phase) => Self::Timeout { phase },
            other => Self::Shutdown(other),
        }
    }
}
