//! Per-task variant resolution (§4.1, §8 invariant 6, scenario S6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ArtemisError;

/// One conditional config block selected by matching `incoming_params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    #[serde(rename = "match", default)]
    pub match_keys: Map<String, Value>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TaskVariants {
    #[serde(default)]
    variants: Vec<Variant>,
}

/// `{ tasks: { <code>: { variants: [ {match, config}, ... ] } } }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskVariantsRoot {
    #[serde(default)]
    tasks: HashMap<String, TaskVariants>,
}

impl TaskVariantsRoot {
    /// Resolve the variant config for `code` given the run's `incoming_params`.
    ///
    /// Zero candidates: empty config. One candidate: always applies. More than
    /// one: exactly one candidate's `match` must equal `incoming` key-for-key.
    pub fn resolve(&self, code: &str, incoming: &Map<String, Value>) -> Result<Map<String, Value>, ArtemisError> {
        let Some(candidates) = self.tasks.get(code).map(|t| &t.variants) else {
            return Ok(Map::new());
        };

        match candidates.len() {
            0 => Ok(Map::new()),
            1 => Ok(candidates[0].config.clone()),
            _ => {
                let mut matched = candidates.iter().filter(|v| {
                    v.match_keys
                        .iter()
                        .all(|(k, want)| incoming.get(k) == Some(want))
                });
                let first = matched.next();
                match (first, matched.next()) {
                    (None, _) => Err(ArtemisError::VariantResolution(format!(
                        "no variant matched for task '{code}'"
                    ))),
                    (Some(_), Some(_)) => Err(ArtemisError::VariantResolution(format!(
                        "multiple variants matched for task '{code}'"
                    ))),
                    (Some(v), None) => Ok(v.config.clone()),
                }
            }
        }
    }
}
