//! Wake Dispatcher: submit the router's "wake" action for one MAC

use super::{RouterRequest, RouterTransport};
use crate::error::DispatchError;
use crate::models::{RouterEndpoint, SessionToken};

/// Ask the router to send a wake packet to `hardware_address`.
///
/// The router answers with an ordinary page, so any completed response counts as
/// success. Whether the machine actually boots is not observed.
pub async fn dispatch(
    transport: &dyn RouterTransport,
    endpoint: &RouterEndpoint,
    token: &SessionToken,
    hardware_address: &str,
) -> Result<(), DispatchError> {
    let form = [
        ("tmenu", "iframe"),
        ("smenu", "expertconfwollist"),
        ("nomore", "0"),
        ("wakeupchk", hardware_address),
        ("act", "wake"),
    ];
    let request =
        RouterRequest::post_form(endpoint.wake_url(), form).with_cookie(token.cookie_header());

    let resp = transport.send(request).await?;
    tracing::debug!("   -> Wake request answered with status {}", resp.status);
    Ok(())
}
