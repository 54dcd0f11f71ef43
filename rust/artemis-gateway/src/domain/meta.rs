//! `TaskMeta`, `ExecType`, and `CallbackEndpoints` (§3).

use std::fmt;

use serde::{Deserialize, Serialize};

/// `run_id`/`task_id` may arrive as either an integer or a string; both are
/// accepted and normalized to a stable string form wherever one is needed
/// (URL path segments, idempotence-map keys).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// `SYNC` or `ASYNC`. Deserialization uppercases the input and rejects
/// anything else, per §3's `TaskMeta` normalization rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecType {
    Sync,
    Async,
}

impl fmt::Display for ExecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync => "SYNC",
            Self::Async => "ASYNC",
        })
    }
}

impl<'de> Deserialize<'de> for ExecType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.to_uppercase().as_str() {
            "SYNC" => Ok(Self::Sync),
            "ASYNC" => Ok(Self::Async),
            other => {
                let err = crate::config::ConfigurationError::invalid(
                    format!("exec_type must be SYNC or ASYNC, got '{other}'"),
                    "set meta.exec_type to the literal string \"SYNC\" or \"ASYNC\"",
                );
                Err(serde::de::Error::custom(err))
            }
        }
    }
}

/// `{progress_path, callback_path, callback_ip?, callback_port?}` (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackEndpoints {
    #[serde(rename = "progress", default)]
    pub progress_path: Option<String>,
    #[serde(rename = "callback", default)]
    pub callback_path: Option<String>,
    #[serde(default)]
    pub callback_ip: Option<String>,
    #[serde(default)]
    pub callback_port: Option<u16>,
}

/// Per-run identity and dispatch mode (§3).
///
/// `task_code` is not part of the wire envelope's `meta` object — it comes
/// from the URL path — so it is filled in by
/// [`crate::domain::request::TaskRunRequest::from_raw`] after deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMeta {
    pub run_id: IdValue,
    pub task_id: IdValue,
    #[serde(skip, default)]
    pub task_code: String,
    pub exec_type: ExecType,
    #[serde(default)]
    pub callback_endpoints: Option<CallbackEndpoints>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_type_accepts_mixed_case() {
        let v: ExecType = serde_json::from_value(serde_json::json!("sync")).unwrap();
        assert_eq!(v, ExecType::Sync);
    }

    #[test]
    fn exec_type_rejects_unknown_value_with_actionable_message() {
        let err = serde_json::from_value::<ExecType>(serde_json::json!("MAYBE")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Invalid configuration"));
        assert!(message.contains("How to fix"));
    }

    #[test]
    fn id_value_accepts_int_or_string() {
        let int: IdValue = serde_json::from_value(serde_json::json!(42)).unwrap();
        let s: IdValue = serde_json::from_value(serde_json::json!("run-42")).unwrap();
        assert_eq!(int.to_string(), "42");
        assert_eq!(s.to_string(), "run-42");
    }
}
