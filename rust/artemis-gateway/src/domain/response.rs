//! Response envelopes the engine returns (§6).

use serde::Serialize;
use serde_json::{Map, Value};

use super::meta::{ExecType, IdValue};

/// The engine's reply, shaped per §6: SYNC carries the full outcome,
/// ASYNC just acknowledges acceptance.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TaskRunResponse {
    Sync {
        task_code: String,
        duration_ms: u64,
        stats: Map<String, Value>,
        status: String,
        run_id: IdValue,
        task_id: IdValue,
        exec_type: ExecType,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AsyncAccepted {
        task_code: String,
        accepted: bool,
        exec_type: ExecType,
        run_id: IdValue,
        task_id: IdValue,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn async_accepted_serializes_without_sync_fields() {
        let resp = TaskRunResponse::AsyncAccepted {
            task_code: "T3".into(),
            accepted: true,
            exec_type: ExecType::Async,
            run_id: IdValue::Int(42),
            task_id: IdValue::Int(1),
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["accepted"], true);
        assert_eq!(v["run_id"], 42);
        assert!(v.get("status").is_none());
    }
}
