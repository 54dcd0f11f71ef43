//! Callback client: progress (best-effort) and finalize (retried,
//! idempotent) calls to the dispatcher (§4.3, §8 invariant 3, §9).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use crate::domain::IdValue;

use super::pool::DependentClient;

const FINALIZE_BACKOFF: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
];

/// Specialization over [`DependentClient`] for the dispatcher's progress and
/// callback endpoints. Holds the per-run finalize-idempotence flag.
pub struct CallbackClient {
    client: Arc<DependentClient>,
    finalized: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for CallbackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackClient").finish_non_exhaustive()
    }
}

impl CallbackClient {
    #[must_use]
    pub fn new(client: Arc<DependentClient>) -> Self {
        Self {
            client,
            finalized: Mutex::new(HashSet::new()),
        }
    }

    /// POST `/api/v1/runs/{run_id}/progress`. Single attempt, best-effort.
    pub async fn progress(&self, run_id: &IdValue, current: u32, total: u32, message: &str) -> bool {
        let body = json!({ "current": current, "total": total, "message": message });
        let path = format!("/api/v1/runs/{run_id}/progress");
        matches!(self.client.post(&path, &body, None).await, Ok(resp) if resp.status().is_success())
    }

    /// POST `/api/v1/runs/{run_id}/callback` with a success body.
    pub async fn finalize_success(&self, run_id: &IdValue, code: u16, message: &str) -> bool {
        let body = json!({ "success": true, "code": code, "message": message });
        self.finalize(run_id, body).await
    }

    /// POST `/api/v1/runs/{run_id}/callback` with a failure body.
    pub async fn finalize_failed(&self, run_id: &IdValue, message: &str) -> bool {
        let body = json!({ "success": false, "message": message });
        self.finalize(run_id, body).await
    }

    /// Retries up to 3 attempts with exponential backoff. At most one
    /// successful finalize per `run_id`: once the flag is set, later calls
    /// return `false` without any network I/O.
    async fn finalize(&self, run_id: &IdValue, body: serde_json::Value) -> bool {
        let key = run_id.to_string();
        if self.finalized.lock().contains(&key) {
            return false;
        }

        let path = format!("/api/v1/runs/{run_id}/callback");
        for (attempt, backoff) in FINALIZE_BACKOFF.iter().enumerate() {
            match self.client.post(&path, &body, None).await {
                Ok(resp) if resp.status().is_success() => {
                    self.finalized.lock().insert(key);
                    return true;
                }
                _ => {
                    if attempt + 1 < FINALIZE_BACKOFF.len() {
                        tokio::time::sleep(*backoff).await;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::pool::DependentClientPool;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CallbackClient {
        let pool = DependentClientPool::new();
        let inner = pool.get(&server.uri(), Duration::from_secs(2));
        CallbackClient::new(inner)
    }

    #[tokio::test]
    async fn progress_is_single_attempt_best_effort() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/runs/10/progress"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let ok = client.progress(&IdValue::Int(10), 1, 3, "children 1/3 done").await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn finalize_success_is_idempotent_after_first_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/runs/42/callback"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let run_id = IdValue::Int(42);
        assert!(client.finalize_success(&run_id, 200, "ok").await);
        // second call must not hit the network again (mock expects exactly 1 call)
        assert!(!client.finalize_success(&run_id, 200, "ok").await);
    }

    #[tokio::test]
    async fn finalize_retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/runs/7/callback"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/runs/7/callback"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let ok = client.finalize_failed(&IdValue::Int(7), "boom").await;
        assert!(ok);
    }
}
