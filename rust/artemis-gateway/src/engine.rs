//! Task engine: builds the run context, dispatches SYNC vs ASYNC, and owns
//! the terminal finalize callback for async runs (§4.7).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::context::{Runtime, TaskContext, TaskStatus};
use crate::domain::{TaskRunRequest, TaskRunResponse};
use crate::error::ArtemisError;
use crate::task_unit::run_unit;

/// Entry point the gateway calls once a request has passed validation and
/// the task code is known to be registered.
pub struct TaskEngine {
    runtime: Arc<Runtime>,
    /// In-flight ASYNC workers, tracked so graceful shutdown can join them
    /// briefly rather than silently dropping them (§9 "async execution
    /// model").
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine").finish_non_exhaustive()
    }
}

impl TaskEngine {
    #[must_use]
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Build the context, dispatch by `exec_type`, and return the response
    /// shape §6 specifies for that mode.
    pub async fn run(&self, request: TaskRunRequest) -> Result<TaskRunResponse, ArtemisError> {
        if !self.runtime.registry.has(&request.meta.task_code) {
            return Err(ArtemisError::UnknownTask(request.meta.task_code.clone()));
        }

        let task_code = request.meta.task_code.clone();
        let run_id = request.meta.run_id.clone();
        let task_id = request.meta.task_id.clone();
        let exec_type = request.meta.exec_type;

        let mut ctx = TaskContext::new(task_code.clone(), &request.meta, request.body, self.runtime.clone());

        if ctx.async_mode() {
            let handle = tokio::spawn(run_async_worker(ctx));
            self.workers.lock().push(handle);
            return Ok(TaskRunResponse::AsyncAccepted {
                task_code,
                accepted: true,
                exec_type,
                run_id,
                task_id,
            });
        }

        let ctor = ctx.unit_ctor.clone().ok_or_else(|| ArtemisError::UnknownTask(task_code.clone()))?;
        let mut unit = ctor();
        run_unit(unit.as_mut(), &mut ctx).await;

        let duration_ms = ctx.duration_ms();
        let status = ctx.status().as_str().to_string();

        Ok(TaskRunResponse::Sync {
            task_code,
            duration_ms,
            stats: ctx.stats,
            status,
            run_id,
            task_id,
            exec_type,
            error: ctx.error,
        })
    }

    /// The currently-loaded configuration snapshot, so the embedding binary
    /// can fall back to `server.host`/`server.port` when no bind override
    /// was given on the command line.
    #[must_use]
    pub fn config(&self) -> crate::config::ConfigRoot {
        self.runtime.config.current()
    }

    /// Wait briefly for all currently tracked async workers to finish.
    pub async fn join_workers(&self, timeout: std::time::Duration) {
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        let _ = tokio::time::timeout(timeout, futures_join_all(handles)).await;
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

/// The async worker body (§4.7): run the unit, then emit exactly one
/// finalize call matching the terminal status.
async fn run_async_worker(mut ctx: TaskContext) {
    let ctor = match ctx.unit_ctor.clone() {
        Some(c) => c,
        None => {
            ctx.set_status(TaskStatus::Failed);
            ctx.set_error(format!("unknown task code: {}", ctx.task_code));
            ctx.close();
            finalize_for(&ctx).await;
            return;
        }
    };
    let mut unit = ctor();
    run_unit(unit.as_mut(), &mut ctx).await;
    finalize_for(&ctx).await;
}

async fn finalize_for(ctx: &TaskContext) {
    let Some(callback) = ctx.callback.clone() else {
        return;
    };
    match ctx.status() {
        TaskStatus::Success => {
            callback.finalize_success(&ctx.run_id, 200, "task completed successfully").await;
        }
        _ => {
            let message = ctx.error.clone().unwrap_or_else(|| "task failed".to_string());
            callback.finalize_failed(&ctx.run_id, &message).await;
        }
    }
}
