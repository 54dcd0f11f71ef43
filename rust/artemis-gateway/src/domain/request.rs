//! The inbound HTTP envelope (§6) and its validated form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ArtemisError;

use super::meta::TaskMeta;

/// Exactly as received on the wire, before `task_code` is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTaskRunRequest {
    pub meta: TaskMeta,
    #[serde(default)]
    pub body: Map<String, Value>,
}

/// A validated request, with `meta.task_code` filled in from the URL path.
#[derive(Debug, Clone)]
pub struct TaskRunRequest {
    pub meta: TaskMeta,
    pub body: Map<String, Value>,
}

impl TaskRunRequest {
    /// Attach the path-derived `task_code` to a deserialized envelope.
    ///
    /// The envelope's own deserialization already enforces required fields
    /// and a valid `exec_type`; this step only normalizes `task_code` (trim,
    /// reject empty) per §3's `TaskCode` rule.
    pub fn from_raw(task_code: &str, raw: RawTaskRunRequest) -> Result<Self, ArtemisError> {
        let task_code = task_code.trim();
        if task_code.is_empty() {
            return Err(ArtemisError::Validation("task_code must not be empty".into()));
        }

        let mut meta = raw.meta;
        meta.task_code = task_code.to_string();

        Ok(Self {
            meta,
            body: raw.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_raw_rejects_blank_task_code() {
        let raw: RawTaskRunRequest = serde_json::from_value(json!({
            "meta": {"run_id": 1, "task_id": 1, "exec_type": "SYNC"},
            "body": {}
        }))
        .unwrap();
        assert!(TaskRunRequest::from_raw("   ", raw).is_err());
    }

    #[test]
    fn from_raw_trims_and_attaches_task_code() {
        let raw: RawTaskRunRequest = serde_json::from_value(json!({
            "meta": {"run_id": 1, "task_id": 1, "exec_type": "SYNC"},
            "body": {}
        }))
        .unwrap();
        let req = TaskRunRequest::from_raw(" T1 ", raw).unwrap();
        assert_eq!(req.meta.task_code, "T1");
    }
}
