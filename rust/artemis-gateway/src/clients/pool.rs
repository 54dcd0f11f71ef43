//! Process-wide pooled HTTP client, keyed by `(base_url, timeout_seconds)`,
//! with W3C `traceparent` injection (§4.3, §8 invariant 4, §9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::trace::TraceContextExt;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// A pooled client bound to one `(base_url, timeout)` key. `reqwest::Client`
/// already keeps its own connection pool internally, so wrapping it here
/// gives the "one client per key" discipline §4.3 asks for.
#[derive(Debug)]
pub struct DependentClient {
    base_url: String,
    inner: reqwest::Client,
}

impl DependentClient {
    fn new(base_url: String, timeout: Duration) -> Self {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { base_url, inner }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Inject a `traceparent` header when a valid trace context is active in
    /// the calling `tracing` span, then overlay any caller-supplied headers
    /// on top so a caller-supplied header of the same name always wins
    /// (§8 invariant 4, spec "caller headers over the injected trace header").
    fn traced_headers(&self, extra: Option<HeaderMap>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(traceparent) = current_traceparent() {
            if let Ok(value) = HeaderValue::from_str(&traceparent) {
                headers.insert(HeaderName::from_static("traceparent"), value);
            }
        }
        if let Some(extra) = extra {
            for key in extra.keys() {
                headers.remove(key);
            }
            headers.extend(extra);
        }
        headers
    }

    pub async fn get(
        &self,
        path: &str,
        query: Option<&[(&str, &str)]>,
        headers: Option<HeaderMap>,
    ) -> reqwest::Result<reqwest::Response> {
        let mut req = self.inner.get(self.url(path)).headers(self.traced_headers(headers));
        if let Some(q) = query {
            req = req.query(q);
        }
        req.send().await
    }

    pub async fn post(
        &self,
        path: &str,
        json: &serde_json::Value,
        headers: Option<HeaderMap>,
    ) -> reqwest::Result<reqwest::Response> {
        self.inner
            .post(self.url(path))
            .headers(self.traced_headers(headers))
            .json(json)
            .send()
            .await
    }
}

/// Build a W3C-style `traceparent` from the current tracing span's
/// OpenTelemetry context, if one is active and valid.
fn current_traceparent() -> Option<String> {
    let span = tracing::Span::current();
    let otel_context = span.context();
    let span_ref = otel_context.span();
    let span_context = span_ref.span_context();
    if !span_context.is_valid() {
        return None;
    }
    Some(format!(
        "00-{}-{}-01",
        span_context.trace_id(),
        span_context.span_id()
    ))
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct PoolKey {
    base_url: String,
    timeout_secs: u64,
}

/// Process-wide map of pooled clients, lazily created and shared across runs.
#[derive(Debug, Default)]
pub struct DependentClientPool {
    clients: RwLock<HashMap<PoolKey, Arc<DependentClient>>>,
}

impl DependentClientPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared client for `(base_url, timeout)`, creating it if
    /// this is the first request for that key.
    #[must_use]
    pub fn get(&self, base_url: &str, timeout: Duration) -> Arc<DependentClient> {
        let key = PoolKey {
            base_url: base_url.to_string(),
            timeout_secs: timeout.as_secs(),
        };

        if let Some(existing) = self.clients.read().get(&key) {
            return existing.clone();
        }

        let mut clients = self.clients.write();
        clients
            .entry(key)
            .or_insert_with(|| Arc::new(DependentClient::new(base_url.to_string(), timeout)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_returns_same_client() {
        let pool = DependentClientPool::new();
        let a = pool.get("http://localhost:9000", Duration::from_secs(5));
        let b = pool.get("http://localhost:9000", Duration::from_secs(5));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_timeout_creates_distinct_client() {
        let pool = DependentClientPool::new();
        let a = pool.get("http://localhost:9000", Duration::from_secs(5));
        let b = pool.get("http://localhost:9000", Duration::from_secs(2));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn no_active_span_omits_traceparent() {
        assert!(current_traceparent().is_none());
    }

    #[test]
    fn caller_supplied_traceparent_wins_over_injected() {
        let client = DependentClient::new("http://localhost:9000".to_string(), Duration::from_secs(5));
        let mut extra = HeaderMap::new();
        extra.insert(HeaderName::from_static("traceparent"), HeaderValue::from_static("caller-value"));
        let headers = client.traced_headers(Some(extra));
        assert_eq!(headers.get("traceparent").unwrap(), "caller-value");
    }
}
