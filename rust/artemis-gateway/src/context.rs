//! Per-run execution context and the shared process runtime it borrows
//! from (§3 `TaskContext`, §4.4, §9 "inherited state across parent and
//! child").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::clients::{CallbackClient, DependentClient, DependentClientPool};
use crate::config::ConfigManager;
use crate::domain::{ExecType, IdValue, TaskMeta};
use crate::registry::{TaskRegistry, UnitConstructor};

/// The set of dependent services whose clients are attached to every
/// context, per §10.5 (cronjob is the dispatcher itself; phoenixA is the
/// second named dependent service carried from the original client map).
pub const KNOWN_DEPT_SERVICES: [&str; 2] = ["cronjob", "phoenixA"];

/// `{PENDING, RUNNING, SUCCESS, FAILED, CANCELED, SKIPPED}` with the single
/// valid transition shape `PENDING -> RUNNING -> terminal` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Canceled | Self::Skipped)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Skipped => "SKIPPED",
        }
    }

    /// Reject transitions outside `PENDING -> RUNNING -> terminal`. A
    /// programming error, not a runtime condition a unit can trigger.
    fn validate_transition(self, next: Self) {
        let ok = match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Running, terminal) if terminal.is_terminal() => true,
            _ => false,
        };
        assert!(ok, "invalid task status transition: {self:?} -> {next:?}");
    }
}

/// The closed, ordered lifecycle phase sequence (§3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ParameterCheck,
    LoadDynamicParameters,
    LoadTaskConfig,
    BeforeExecute,
    Execute,
    PostProcess,
    Sink,
    Finalize,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParameterCheck => "parameter_check",
            Self::LoadDynamicParameters => "load_dynamic_parameters",
            Self::LoadTaskConfig => "load_task_config",
            Self::BeforeExecute => "before_execute",
            Self::Execute => "execute",
            Self::PostProcess => "post_process",
            Self::Sink => "sink",
            Self::Finalize => "finalize",
        }
    }

    #[must_use]
    pub fn all() -> [Self; 8] {
        [
            Self::ParameterCheck,
            Self::LoadDynamicParameters,
            Self::LoadTaskConfig,
            Self::BeforeExecute,
            Self::Execute,
            Self::PostProcess,
            Self::Sink,
            Self::Finalize,
        ]
    }
}

/// Process-wide collaborators a run's context borrows from: the registry,
/// the config manager, and the two pools. One instance is built at startup
/// and shared (via `Arc`) across every concurrent run.
pub struct Runtime {
    pub registry: TaskRegistry,
    pub config: ConfigManager,
    pub client_pool: DependentClientPool,
    pub callback_pool: CallbackPool,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

/// Keeps one [`CallbackClient`] (and its finalize-idempotence state) alive
/// per dispatcher base URL for the process lifetime, mirroring
/// [`DependentClientPool`] but specialized to the callback endpoints.
#[derive(Default)]
pub struct CallbackPool {
    inner: parking_lot::RwLock<HashMap<String, Arc<CallbackClient>>>,
}

impl std::fmt::Debug for CallbackPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackPool").finish_non_exhaustive()
    }
}

impl CallbackPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, dependent: Arc<DependentClient>, base_url: &str) -> Arc<CallbackClient> {
        if let Some(existing) = self.inner.read().get(base_url) {
            return existing.clone();
        }
        let mut inner = self.inner.write();
        inner
            .entry(base_url.to_string())
            .or_insert_with(|| Arc::new(CallbackClient::new(dependent)))
            .clone()
    }
}

/// Per-run state (§3). Owns its own `params`/`stats`/`status`/timestamps;
/// borrows `dept_clients` and `callback` from whatever built it — the
/// engine for a top-level run, the parent context for a child (§9).
pub struct TaskContext {
    pub task_code: String,
    pub run_id: IdValue,
    pub task_id: IdValue,
    pub exec_type: ExecType,

    pub incoming_params: Map<String, Value>,
    pub params: Map<String, Value>,

    status: TaskStatus,
    pub error: Option<String>,
    start: Instant,
    end: Option<Instant>,
    pub children_total: u32,
    pub children_completed: u32,

    pub stats: Map<String, Value>,

    pub dept_clients: HashMap<String, Arc<DependentClient>>,
    pub callback: Option<Arc<CallbackClient>>,
    pub unit_ctor: Option<UnitConstructor>,

    pub runtime: Arc<Runtime>,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_code", &self.task_code)
            .field("run_id", &self.run_id)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    /// Build a top-level run context from a validated request. Resolves the
    /// unit constructor from the registry, attaches the known
    /// dependent-service clients, and installs a callback client resolved
    /// per §4.4's priority (dept_services.cronjob, else
    /// `meta.callback_endpoints`; neither present → no callback client, and
    /// progress/finalize silently return false).
    #[must_use]
    pub fn new(
        task_code: String,
        meta: &TaskMeta,
        incoming_params: Map<String, Value>,
        runtime: Arc<Runtime>,
    ) -> Self {
        let unit_ctor = runtime.registry.get(&task_code);

        let config = runtime.config.current();
        let timeout = Duration::from_secs(config.http_client.timeout_seconds);

        let mut dept_clients = HashMap::new();
        for name in KNOWN_DEPT_SERVICES {
            if let Some(svc) = config.dept_services.get(name) {
                if let Some(host) = &svc.host {
                    let base_url = match svc.port {
                        Some(port) => format!("{host}:{port}"),
                        None => host.clone(),
                    };
                    dept_clients.insert(name.to_string(), runtime.client_pool.get(&base_url, timeout));
                }
            }
        }

        let callback = resolve_callback_base_url(&config, meta).map(|base_url| {
            let dependent = runtime.client_pool.get(&base_url, Duration::from_secs(2));
            runtime.callback_pool.get(dependent, &base_url)
        });

        Self {
            task_code,
            run_id: meta.run_id.clone(),
            task_id: meta.task_id.clone(),
            exec_type: meta.exec_type,
            incoming_params,
            params: Map::new(),
            status: TaskStatus::Pending,
            error: None,
            start: Instant::now(),
            end: None,
            children_total: 0,
            children_completed: 0,
            stats: Map::new(),
            dept_clients,
            callback,
            unit_ctor,
            runtime,
        }
    }

    /// Build a child context for orchestrator fan-out (§4.6, §9): the child
    /// borrows the parent's identity, clients, and callback channel but
    /// owns fresh `params`/`stats`/`status`/timers.
    #[must_use]
    pub fn make_child(&self, task_code: String, params: Map<String, Value>) -> Self {
        let unit_ctor = self.runtime.registry.get(&task_code);
        Self {
            task_code,
            run_id: self.run_id.clone(),
            task_id: self.task_id.clone(),
            exec_type: self.exec_type,
            incoming_params: params,
            params: Map::new(),
            status: TaskStatus::Pending,
            error: None,
            start: Instant::now(),
            end: None,
            children_total: 0,
            children_completed: 0,
            stats: Map::new(),
            dept_clients: self.dept_clients.clone(),
            callback: self.callback.clone(),
            unit_ctor,
            runtime: self.runtime.clone(),
        }
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn set_status(&mut self, next: TaskStatus) {
        self.status.validate_transition(next);
        self.status = next;
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    #[must_use]
    pub fn async_mode(&self) -> bool {
        self.exec_type == ExecType::Async
    }

    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        let end = self.end.unwrap_or_else(Instant::now);
        end.saturating_duration_since(self.start).as_millis() as u64
    }

    pub fn stat(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.stats.insert(key.into(), value.into());
    }

    pub fn inc_stat(&mut self, key: &str, delta: i64) {
        let current = self.stats.get(key).and_then(Value::as_i64).unwrap_or(0);
        self.stats.insert(key.to_string(), Value::from(current + delta));
    }

    pub fn mark_child_total(&mut self, n: u32) {
        self.children_total = n;
    }

    pub fn inc_child_completed(&mut self) {
        self.children_completed += 1;
    }

    /// Mark the run terminal. Idempotent: a second call is a no-op.
    pub fn close(&mut self) {
        if self.end.is_none() {
            self.end = Some(Instant::now());
        }
    }
}

/// §4.4: `dept_services.cronjob` wins over `meta.callback_endpoints`.
/// Neither present means no callback client is installed.
fn resolve_callback_base_url(config: &crate::config::ConfigRoot, meta: &TaskMeta) -> Option<String> {
    if let Some(cronjob) = config.dept_services.get("cronjob") {
        if let Some(host) = &cronjob.host {
            return Some(match cronjob.port {
                Some(port) => format!("{host}:{port}"),
                None => host.clone(),
            });
        }
    }
    let endpoints = meta.callback_endpoints.as_ref()?;
    let ip = endpoints.callback_ip.as_ref()?;
    Some(match endpoints.callback_port {
        Some(port) => format!("{ip}:{port}"),
        None => ip.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CallbackEndpoints;

    fn runtime_fixture(dir: &std::path::Path) -> Arc<Runtime> {
        Arc::new(Runtime {
            registry: TaskRegistry::new(dir.join("registrations.yaml")),
            config: ConfigManager::init(Some(dir.join("config.yaml").to_str().unwrap()), None).unwrap(),
            client_pool: DependentClientPool::new(),
            callback_pool: CallbackPool::new(),
        })
    }

    fn meta_fixture() -> TaskMeta {
        TaskMeta {
            run_id: IdValue::Int(10),
            task_id: IdValue::Int(1),
            task_code: "T1".into(),
            exec_type: ExecType::Sync,
            callback_endpoints: Some(CallbackEndpoints {
                progress_path: Some("/api/v1/runs/10/progress".into()),
                callback_path: Some("/api/v1/runs/10/callback".into()),
                callback_ip: Some("http://127.0.0.1:9999".into()),
                callback_port: None,
            }),
        }
    }

    #[test]
    fn status_transitions_reject_skipping_running() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_fixture(dir.path());
        let mut ctx = TaskContext::new("T1".into(), &meta_fixture(), Map::new(), runtime);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.set_status(TaskStatus::Success);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn valid_transition_sequence_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_fixture(dir.path());
        let mut ctx = TaskContext::new("T1".into(), &meta_fixture(), Map::new(), runtime);
        ctx.set_status(TaskStatus::Running);
        ctx.set_status(TaskStatus::Success);
        assert!(ctx.is_finished());
    }

    #[test]
    fn child_context_borrows_identity_and_callback() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_fixture(dir.path());
        let parent = TaskContext::new("T5".into(), &meta_fixture(), Map::new(), runtime);
        let child = parent.make_child("C".into(), Map::new());
        assert_eq!(child.run_id, parent.run_id);
        assert_eq!(child.task_id, parent.task_id);
        assert!(child.callback.is_some());
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_fixture(dir.path());
        let mut ctx = TaskContext::new("T1".into(), &meta_fixture(), Map::new(), runtime);
        ctx.close();
        let first = ctx.duration_ms();
        ctx.close();
        assert_eq!(first, ctx.duration_ms());
    }
}
