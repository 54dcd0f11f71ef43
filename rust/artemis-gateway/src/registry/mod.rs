//! Task registry: `TaskCode -> TaskSpec`, static and dynamic registration,
//! and persistence of dynamic entries (§4.2).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ArtemisError;
use crate::task_unit::TaskUnit;

/// Produces a fresh task unit instance for a resolved task code.
///
/// Dynamic code loading is out of scope (§9's design note): registering a
/// "dynamic" task still requires a constructor linked into this binary. The
/// persisted `{module_ref, class_name}` pair is an index over already-linked
/// constructors, not a loader directive.
pub type UnitConstructor = Arc<dyn Fn() -> Box<dyn TaskUnit + Send> + Send + Sync>;

/// `{module_ref, class_name, is_dynamic}` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub module_ref: String,
    pub class_name: String,
    #[serde(skip)]
    pub is_dynamic: bool,
}

struct Entry {
    spec: TaskSpec,
    ctor: UnitConstructor,
}

/// `TaskCode -> TaskSpec` with static/dynamic registration and persistence.
pub struct TaskRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    registrations_path: PathBuf,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("codes", &self.entries.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Normalize a task code: trim whitespace, reject empty (§4.2 key policy).
pub fn normalize_code(code: &str) -> Result<String, ArtemisError> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(ArtemisError::Registry("task code must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

impl TaskRegistry {
    #[must_use]
    pub fn new(registrations_path: impl Into<PathBuf>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            registrations_path: registrations_path.into(),
        }
    }

    /// Register a task code. Duplicate codes fail; the prior entry is left
    /// untouched (§8 invariant 7).
    pub fn register(
        &self,
        code: &str,
        module_ref: impl Into<String>,
        class_name: impl Into<String>,
        ctor: UnitConstructor,
        is_dynamic: bool,
    ) -> Result<(), ArtemisError> {
        let code = normalize_code(code)?;
        let mut entries = self.entries.write();
        if entries.contains_key(&code) {
            return Err(ArtemisError::Registry(format!(
                "task code '{code}' is already registered"
            )));
        }
        entries.insert(
            code,
            Entry {
                spec: TaskSpec {
                    module_ref: module_ref.into(),
                    class_name: class_name.into(),
                    is_dynamic,
                },
                ctor,
            },
        );
        drop(entries);
        if is_dynamic {
            self.persist()?;
        }
        Ok(())
    }

    /// Only dynamic entries may be unregistered; static entries are immutable.
    pub fn unregister(&self, code: &str) -> Result<(), ArtemisError> {
        let code = normalize_code(code)?;
        let mut entries = self.entries.write();
        match entries.get(&code) {
            None => Err(ArtemisError::Registry(format!(
                "task code '{code}' is not registered"
            ))),
            Some(entry) if !entry.spec.is_dynamic => Err(ArtemisError::Registry(format!(
                "task code '{code}' is statically registered and cannot be unregistered"
            ))),
            Some(_) => {
                entries.remove(&code);
                drop(entries);
                self.persist()?;
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn has(&self, code: &str) -> bool {
        normalize_code(code)
            .map(|c| self.entries.read().contains_key(&c))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn get(&self, code: &str) -> Option<UnitConstructor> {
        let code = normalize_code(code).ok()?;
        self.entries.read().get(&code).map(|e| e.ctor.clone())
    }

    #[must_use]
    pub fn list(&self) -> HashMap<String, TaskSpec> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.spec.clone()))
            .collect()
    }

    /// Load persisted dynamic registrations from disk, resolving each
    /// `{module_ref, class_name}` pair against a table of statically-linked
    /// constructors. Entries this binary has no constructor for are skipped
    /// (logged, not fatal) — new code is never loaded at runtime.
    pub fn load_persisted(
        &self,
        known: &HashMap<(String, String), UnitConstructor>,
    ) -> anyhow::Result<()> {
        let contents = match std::fs::read_to_string(&self.registrations_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let persisted: HashMap<String, PersistedSpec> = serde_yaml::from_str(&contents)?;
        for (code, spec) in persisted {
            let key = (spec.module.clone(), spec.class_name.clone());
            match known.get(&key) {
                Some(ctor) => {
                    if let Err(e) = self.register(&code, spec.module, spec.class_name, ctor.clone(), true) {
                        tracing::warn!(task_code = %code, error = %e, "failed to re-register persisted dynamic task");
                    }
                }
                None => {
                    tracing::warn!(
                        task_code = %code,
                        module = %spec.module,
                        class_name = %spec.class_name,
                        "persisted dynamic registration has no known constructor; skipping"
                    );
                }
            }
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), ArtemisError> {
        let entries = self.entries.read();
        let persisted: HashMap<&str, PersistedSpec> = entries
            .iter()
            .filter(|(_, e)| e.spec.is_dynamic)
            .map(|(code, e)| {
                (
                    code.as_str(),
                    PersistedSpec {
                        module: e.spec.module_ref.clone(),
                        class_name: e.spec.class_name.clone(),
                    },
                )
            })
            .collect();

        if let Some(parent) = self.registrations_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArtemisError::Registry(format!("creating registrations dir: {e}")))?;
        }
        let yaml = serde_yaml::to_string(&persisted)
            .map_err(|e| ArtemisError::Registry(format!("serializing registrations: {e}")))?;
        std::fs::write(&self.registrations_path, yaml)
            .map_err(|e| ArtemisError::Registry(format!("writing registrations file: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSpec {
    module: String,
    class_name: String,
}
