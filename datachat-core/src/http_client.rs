use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::Stream;
use reqwest::{multipart::Form, Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::HttpCfg;
use crate::error::{CoreResult, DataChatError};

/// Request context carries the caller's correlation id.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
}

/// Raw response body chunks, in arrival order.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| DataChatError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("datachat/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    async fn send_multipart(
        &self,
        url: &str,
        form: Form,
        accept: &str,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<reqwest::Response> {
        let mut req = self
            .inner
            .post(url)
            .multipart(form)
            .header("User-Agent", &self.user_agent)
            .header("Accept", accept);
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::warn!(url, error = %e, "request failed");
            DataChatError::Unavailable {
                endpoint: url.to_string(),
                message: None,
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let ra = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(url, status, ra, &body));
        }
        Ok(resp)
    }

    /// POST a multipart form and decode a JSON response.
    /// Returns the body, the backend's request id (if echoed) and latency in ms.
    pub async fn post_multipart_json<R: DeserializeOwned>(
        &self,
        url: &str,
        form: Form,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, Option<String>, u32)> {
        let start = Instant::now();
        let resp = self
            .send_multipart(url, form, "application/json", ctx)
            .await?;
        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();
        let backend_request_id = extract_request_id(resp.headers());

        let parsed = resp.json::<R>().await.map_err(|e| DataChatError::Http {
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })?;
        Ok((parsed, backend_request_id, latency))
    }

    /// POST a multipart form and hand back the response body as a chunk stream.
    /// Resolves once the response headers are in; the body is read lazily.
    pub async fn post_multipart_stream(
        &self,
        url: &str,
        form: Form,
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<ByteStream> {
        let resp = self.send_multipart(url, form, "text/plain", ctx).await?;
        if let Some(rid) = extract_request_id(resp.headers()) {
            tracing::debug!(backend_request_id = %rid, "stream opened");
        }
        Ok(Box::pin(resp.bytes_stream()))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["x-request-id", "request-id", "x-amzn-requestid"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    None
}

fn map_http_error(url: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> DataChatError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => DataChatError::RateLimited {
            retry_after,
            message: backend_message(body),
        },
        s if s.is_server_error() => DataChatError::Unavailable {
            endpoint: url.to_string(),
            message: backend_message(body),
        },
        s => DataChatError::Http {
            code: s.as_u16().to_string(),
            message: backend_message(body).unwrap_or_else(|| truncate(body, 300)),
        },
    }
}

/// The backend's `{"message": ...}` error field, if the body is JSON carrying one.
fn backend_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(|m| truncate(m, 300)))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}
