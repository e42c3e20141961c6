//! HTTP client for the router's admin pages, with timeouts and hand-built form bodies

use crate::config::HttpConfig;
use crate::error::TransportError;
use crate::router::{Method, RouterRequest, RouterResponse, RouterTransport};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, USER_AGENT,
};
use reqwest::Client;
use std::time::Duration;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        headers.insert(CONNECTION, HeaderValue::from_static("close"));

        // Sessions are carried by hand in the Cookie header; no cookie jar, no keep-alive
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout))
            .pool_max_idle_per_host(0)
            .default_headers(headers)
            .build()?;

        Ok(Self { inner: client })
    }
}

/// `application/x-www-form-urlencoded` body, fields kept in the given order
pub fn encode_form(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl RouterTransport for HttpClient {
    async fn send(&self, request: RouterRequest) -> Result<RouterResponse, TransportError> {
        let field_names: Vec<&str> = request.form.iter().map(|(k, _)| k.as_str()).collect();
        tracing::debug!(
            "{} {} (fields: [{}], cookie: {})",
            request.method,
            request.url,
            field_names.join(", "),
            request.cookie.is_some()
        );

        let mut builder = match request.method {
            Method::Get => self.inner.get(request.url.as_str()),
            Method::Post => {
                let body = encode_form(&request.form);
                self.inner
                    .post(request.url.as_str())
                    .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                    .header(CONTENT_LENGTH, body.len())
                    .body(body)
            }
        };
        if let Some(cookie) = &request.cookie {
            builder = builder.header(COOKIE, cookie.as_str());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        tracing::debug!("   -> {} ({} bytes)", status, body.len());

        Ok(RouterResponse {
            status: status.as_u16(),
            body,
        })
    }
}
