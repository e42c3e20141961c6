//! Device Directory Resolver: map a device name to its MAC via the Wake-on-LAN list

use super::{RouterRequest, RouterTransport};
use crate::error::ResolveError;
use crate::models::{DeviceRecord, RouterEndpoint, SessionToken};
use crate::parser::{self, RowLayout};

/// Fetch the Wake-on-LAN list and return the first row named `target_name`.
pub async fn resolve(
    transport: &dyn RouterTransport,
    endpoint: &RouterEndpoint,
    token: &SessionToken,
    target_name: &str,
    layouts: &[RowLayout],
) -> Result<DeviceRecord, ResolveError> {
    let request = RouterRequest::get(endpoint.list_url()).with_cookie(token.cookie_header());
    let resp = transport.send(request).await?;

    let record = parser::find_device(&resp.body, target_name, layouts)?;
    tracing::info!(
        "   -> Found {} at {}",
        record.display_name,
        record.hardware_address
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ListingLayout;
    use crate::router::testing::FakeRouter;
    use crate::router::Method;

    const LISTING: &str = r#"
        <table>
          <tr class="wol_main_tr">
            <td><input type="checkbox" name="wakeupchk" value="11:22:33:44:55:66"></td>
            <td><span class="wol_main_span">11:22:33:44:55:66</span></td>
            <td><span class="wol_main_span">NAS</span></td>
          </tr>
          <tr class="wol_main_tr">
            <td><input type="checkbox" name="wakeupchk" value="AA:BB:CC:DD:EE:FF"></td>
            <td><span class="wol_main_span">AA:BB:CC:DD:EE:FF</span></td>
            <td><span class="wol_main_span"> Desktop-1 </span></td>
          </tr>
        </table>"#;

    #[tokio::test]
    async fn test_resolve_sends_session_cookie() {
        let endpoint = RouterEndpoint::new("http://router.local", None).unwrap();
        let token = SessionToken::from_raw("tok").unwrap();
        let router = FakeRouter::new().respond(LISTING);

        let record = resolve(
            &router,
            &endpoint,
            &token,
            "Desktop-1",
            ListingLayout::Auto.layouts(),
        )
        .await
        .unwrap();
        assert_eq!(record.hardware_address, "AA:BB:CC:DD:EE:FF");

        let requests = router.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(
            requests[0].url,
            "http://router.local/sess-bin/timepro.cgi?tmenu=iframe&smenu=expertconfwollist"
        );
        assert_eq!(requests[0].cookie.as_deref(), Some("efm_session_id=tok"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_device() {
        let endpoint = RouterEndpoint::new("http://router.local", None).unwrap();
        let token = SessionToken::from_raw("tok").unwrap();
        let router = FakeRouter::new().respond(LISTING);

        let err = resolve(
            &router,
            &endpoint,
            &token,
            "Laptop",
            ListingLayout::Auto.layouts(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ResolveError::DeviceNotFound(name) if name == "Laptop"));
    }
}
