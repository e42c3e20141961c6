//! Session Authenticator: log in and pull the session id out of the response page

use super::{RouterRequest, RouterTransport};
use crate::error::AuthError;
use crate::models::{Credentials, RouterEndpoint, SessionToken};
use crate::parser;

/// Log in with `credentials` and return the session cookie the router handed out.
pub async fn authenticate(
    transport: &dyn RouterTransport,
    endpoint: &RouterEndpoint,
    credentials: &Credentials,
) -> Result<SessionToken, AuthError> {
    let referer = endpoint.login_referer();
    let form = [
        ("username", credentials.username.as_str()),
        ("passwd", credentials.password.as_str()),
        ("init_status", "1"),
        ("captcha_on", "1"),
        ("default_passwd", "admin"),
        ("Referer", referer.as_str()),
    ];

    let resp = transport
        .send(RouterRequest::post_form(endpoint.login_url(), form))
        .await?;
    if resp.status >= 400 {
        tracing::warn!("   -> Login page answered with status {}", resp.status);
    }

    let token = parser::extract_session_token(&resp.body).ok_or(AuthError::SessionTokenNotFound)?;
    tracing::info!("   -> Got session for: {}", credentials.username);
    Ok(token)
}
