//! Router admin-page client
//!
//! Powering on goes through three requests against the router's web interface:
//! log in ([`auth`]), look the target up in the Wake-on-LAN list ([`directory`]),
//! and ask the router to wake it ([`wake`]). Each step takes the previous step's
//! output as an argument; nothing is cached between runs.
//!
//! Requests go through the [`RouterTransport`] trait so the steps can be driven
//! without a live router.

pub mod auth;
pub mod directory;
pub mod wake;

pub use auth::authenticate;
pub use directory::resolve;
pub use wake::dispatch;

use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
        })
    }
}

/// One request to the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterRequest {
    pub method: Method,
    pub url: String,
    /// Full `Cookie` header value, if the request needs a session
    pub cookie: Option<String>,
    /// Form fields for POST requests, in wire order
    pub form: Vec<(String, String)>,
}

impl RouterRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            cookie: None,
            form: Vec::new(),
        }
    }

    pub fn post_form<K, V>(url: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            method: Method::Post,
            url: url.into(),
            cookie: None,
            form: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Value of a form field, if present
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RouterResponse {
    pub status: u16,
    pub body: String,
}

/// Sends requests to the router
#[async_trait]
pub trait RouterTransport: Send + Sync {
    /// Any completed HTTP exchange is `Ok`, whatever its status code
    async fn send(&self, request: RouterRequest) -> Result<RouterResponse, TransportError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned responses and records every request it receives
    #[derive(Default)]
    pub struct FakeRouter {
        responses: Mutex<VecDeque<Result<RouterResponse, TransportError>>>,
        requests: Mutex<Vec<RouterRequest>>,
        delay: Option<Duration>,
    }

    impl FakeRouter {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every request takes `delay` before it is answered
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn respond(self, body: &str) -> Self {
            self.push(Ok(RouterResponse {
                status: 200,
                body: body.to_string(),
            }))
        }

        pub fn fail(self, err: TransportError) -> Self {
            self.push(Err(err))
        }

        pub fn push(self, reply: Result<RouterResponse, TransportError>) -> Self {
            self.responses.lock().unwrap().push_back(reply);
            self
        }

        pub fn requests(&self) -> Vec<RouterRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RouterTransport for FakeRouter {
        async fn send(&self, request: RouterRequest) -> Result<RouterResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connect("no canned response".into())))
        }
    }
}
