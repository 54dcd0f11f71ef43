//! The task unit lifecycle state machine (§4.5).
//!
//! A unit overrides only the phases it needs; `load_task_config` is fixed
//! behavior driven by [`run_unit`] itself, not an override point — the spec
//! gives it one exact merge algorithm and no unit-specific variation.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::{Phase, TaskContext, TaskStatus};
use crate::error::ArtemisError;

/// Override points of the lifecycle. `execute` is the only phase without a
/// default: a unit with nothing else to say must still say what it does.
#[async_trait]
pub trait TaskUnit: Send {
    async fn parameter_check(&mut self, _ctx: &mut TaskContext) -> Result<(), ArtemisError> {
        Ok(())
    }

    async fn load_dynamic_parameters(
        &mut self,
        _ctx: &mut TaskContext,
    ) -> Result<Map<String, Value>, ArtemisError> {
        Ok(Map::new())
    }

    async fn before_execute(&mut self, _ctx: &mut TaskContext) -> Result<(), ArtemisError> {
        Ok(())
    }

    async fn execute(&mut self, ctx: &mut TaskContext) -> Result<Value, ArtemisError>;

    async fn post_process(&mut self, _ctx: &mut TaskContext, raw: Value) -> Result<Value, ArtemisError> {
        Ok(raw)
    }

    async fn sink(&mut self, _ctx: &mut TaskContext, _processed: &Value) -> Result<(), ArtemisError> {
        Ok(())
    }

    async fn finalize(&mut self, _ctx: &mut TaskContext) -> Result<(), ArtemisError> {
        Ok(())
    }
}

fn phase_enter(ctx: &TaskContext, phase: Phase) -> Instant {
    tracing::debug!(
        run_id = %ctx.run_id,
        task_code = %ctx.task_code,
        phase = phase.as_str(),
        "phase_enter"
    );
    Instant::now()
}

fn phase_ok(ctx: &TaskContext, phase: Phase, started: Instant, durations: &mut Map<String, Value>) {
    let elapsed = started.elapsed().as_millis() as u64;
    durations.insert(phase.as_str().to_string(), Value::from(elapsed));
    tracing::debug!(
        run_id = %ctx.run_id,
        task_code = %ctx.task_code,
        phase = phase.as_str(),
        duration_ms = elapsed,
        "phase_ok"
    );
}

fn phase_error(ctx: &TaskContext, phase: Phase, started: Instant, durations: &mut Map<String, Value>, err: &ArtemisError) {
    let elapsed = started.elapsed().as_millis() as u64;
    durations.insert(phase.as_str().to_string(), Value::from(elapsed));
    tracing::warn!(
        run_id = %ctx.run_id,
        task_code = %ctx.task_code,
        phase = phase.as_str(),
        duration_ms = elapsed,
        error = %err,
        "phase_error"
    );
}

/// Run the full 8-phase lifecycle against `ctx`, timing each phase into
/// `ctx.stats.phase_durations_ms` and driving `ctx.status` through
/// `RUNNING -> {SUCCESS, FAILED}` (§4.5's run loop). `close()` always runs,
/// on every exit path, regardless of which phase raised.
pub async fn run_unit(unit: &mut dyn TaskUnit, ctx: &mut TaskContext) {
    ctx.set_status(TaskStatus::Running);
    tracing::info!(
        run_id = %ctx.run_id,
        task_id = %ctx.task_id,
        task_code = %ctx.task_code,
        "task_start"
    );

    let mut durations = Map::new();
    let result = drive(unit, ctx, &mut durations).await;

    ctx.stat("phase_durations_ms", Value::Object(durations));
    ctx.stat("total_duration_ms", Value::from(ctx.duration_ms()));

    match result {
        Ok(()) => {
            ctx.set_status(TaskStatus::Success);
            tracing::info!(run_id = %ctx.run_id, task_code = %ctx.task_code, "task_success");
        }
        Err(e) => {
            ctx.set_error(e.to_string());
            ctx.set_status(TaskStatus::Failed);
            tracing::warn!(run_id = %ctx.run_id, task_code = %ctx.task_code, error = %e, "task_failed");
        }
    }

    ctx.close();
}

async fn drive(
    unit: &mut dyn TaskUnit,
    ctx: &mut TaskContext,
    durations: &mut Map<String, Value>,
) -> Result<(), ArtemisError> {
    let started = phase_enter(ctx, Phase::ParameterCheck);
    match unit.parameter_check(ctx).await {
        Ok(()) => phase_ok(ctx, Phase::ParameterCheck, started, durations),
        Err(e) => {
            phase_error(ctx, Phase::ParameterCheck, started, durations, &e);
            return Err(e);
        }
    }

    let started = phase_enter(ctx, Phase::LoadDynamicParameters);
    let dynamic_map = match unit.load_dynamic_parameters(ctx).await {
        Ok(m) => {
            phase_ok(ctx, Phase::LoadDynamicParameters, started, durations);
            m
        }
        Err(e) => {
            phase_error(ctx, Phase::LoadDynamicParameters, started, durations, &e);
            return Err(e);
        }
    };

    let started = phase_enter(ctx, Phase::LoadTaskConfig);
    match load_task_config(ctx, dynamic_map) {
        Ok(()) => phase_ok(ctx, Phase::LoadTaskConfig, started, durations),
        Err(e) => {
            phase_error(ctx, Phase::LoadTaskConfig, started, durations, &e);
            return Err(e);
        }
    }

    let started = phase_enter(ctx, Phase::BeforeExecute);
    match unit.before_execute(ctx).await {
        Ok(()) => phase_ok(ctx, Phase::BeforeExecute, started, durations),
        Err(e) => {
            phase_error(ctx, Phase::BeforeExecute, started, durations, &e);
            return Err(e);
        }
    }

    let started = phase_enter(ctx, Phase::Execute);
    let raw = match unit.execute(ctx).await {
        Ok(v) => {
            phase_ok(ctx, Phase::Execute, started, durations);
            v
        }
        Err(e) => {
            phase_error(ctx, Phase::Execute, started, durations, &e);
            return Err(e);
        }
    };

    let started = phase_enter(ctx, Phase::PostProcess);
    let processed = match unit.post_process(ctx, raw).await {
        Ok(v) => {
            phase_ok(ctx, Phase::PostProcess, started, durations);
            v
        }
        Err(e) => {
            phase_error(ctx, Phase::PostProcess, started, durations, &e);
            return Err(e);
        }
    };

    let started = phase_enter(ctx, Phase::Sink);
    match unit.sink(ctx, &processed).await {
        Ok(()) => phase_ok(ctx, Phase::Sink, started, durations),
        Err(e) => {
            phase_error(ctx, Phase::Sink, started, durations, &e);
            return Err(e);
        }
    }

    let started = phase_enter(ctx, Phase::Finalize);
    match unit.finalize(ctx).await {
        Ok(()) => phase_ok(ctx, Phase::Finalize, started, durations),
        Err(e) => {
            phase_error(ctx, Phase::Finalize, started, durations, &e);
            return Err(e);
        }
    }

    Ok(())
}

/// Fixed merge algorithm, last-wins: `task_defaults[code] <- task_variant <-
/// dynamic_map <- incoming_params` (§4.1, §4.5, §8 invariant 6). Not an
/// override point.
fn load_task_config(ctx: &mut TaskContext, dynamic_map: Map<String, Value>) -> Result<(), ArtemisError> {
    let mut merged = ctx.runtime.config.task_default(&ctx.task_code);

    let variant = ctx.runtime.config.task_variant(&ctx.task_code, &ctx.incoming_params)?;
    for (k, v) in variant {
        merged.insert(k, v);
    }

    for (k, v) in dynamic_map {
        merged.insert(k, v);
    }

    for (k, v) in ctx.incoming_params.clone() {
        merged.insert(k, v);
    }

    ctx.params = merged;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::DependentClientPool;
    use crate::config::ConfigManager;
    use crate::context::{CallbackPool, Runtime};
    use crate::domain::{ExecType, IdValue, TaskMeta};
    use crate::registry::TaskRegistry;
    use std::sync::Arc;

    struct EchoUnit;
    #[async_trait::async_trait]
    impl TaskUnit for EchoUnit {
        async fn execute(&mut self, ctx: &mut TaskContext) -> Result<Value, ArtemisError> {
            ctx.stat("n", 1);
            Ok(serde_json::json!({"ok": 1}))
        }
    }

    struct FailingUnit;
    #[async_trait::async_trait]
    impl TaskUnit for FailingUnit {
        async fn execute(&mut self, _ctx: &mut TaskContext) -> Result<Value, ArtemisError> {
            Err(ArtemisError::Phase("boom".into()))
        }
    }

    fn runtime_fixture(dir: &std::path::Path) -> Arc<Runtime> {
        Arc::new(Runtime {
            registry: TaskRegistry::new(dir.join("registrations.yaml")),
            config: ConfigManager::init(Some(dir.join("config.yaml").to_str().unwrap()), None).unwrap(),
            client_pool: DependentClientPool::new(),
            callback_pool: CallbackPool::new(),
        })
    }

    fn meta_fixture(run_id: i64) -> TaskMeta {
        TaskMeta {
            run_id: IdValue::Int(run_id),
            task_id: IdValue::Int(1),
            task_code: "T1".into(),
            exec_type: ExecType::Sync,
            callback_endpoints: None,
        }
    }

    #[tokio::test]
    async fn s1_sync_success_records_all_phase_durations() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_fixture(dir.path());
        let mut ctx = TaskContext::new("T1".into(), &meta_fixture(10), Map::new(), runtime);
        let mut unit = EchoUnit;
        run_unit(&mut unit, &mut ctx).await;

        assert_eq!(ctx.status().as_str(), "SUCCESS");
        assert_eq!(ctx.stats.get("n").and_then(Value::as_i64), Some(1));
        let durations = ctx.stats.get("phase_durations_ms").unwrap().as_object().unwrap();
        for phase in Phase::all() {
            assert!(durations.contains_key(phase.as_str()), "missing {}", phase.as_str());
        }
    }

    #[tokio::test]
    async fn s2_sync_failure_stops_before_post_process() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_fixture(dir.path());
        let mut ctx = TaskContext::new("T2".into(), &meta_fixture(11), Map::new(), runtime);
        let mut unit = FailingUnit;
        run_unit(&mut unit, &mut ctx).await;

        assert_eq!(ctx.status().as_str(), "FAILED");
        assert_eq!(ctx.error.as_deref(), Some("phase error: boom"));
        let durations = ctx.stats.get("phase_durations_ms").unwrap().as_object().unwrap();
        assert!(durations.contains_key("execute"));
        assert!(!durations.contains_key("post_process"));
    }

    #[tokio::test]
    async fn invariant6_incoming_params_win_merge() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "task_defaults:\n  T1:\n    a: 1\n    b: 2\n",
        )
        .unwrap();
        let runtime = runtime_fixture(dir.path());
        let mut ctx = TaskContext::new("T1".into(), &meta_fixture(12), Map::new(), runtime);
        ctx.incoming_params.insert("b".into(), Value::from(99));
        load_task_config(&mut ctx, Map::new()).unwrap();
        assert_eq!(ctx.params.get("a").and_then(Value::as_i64), Some(1));
        assert_eq!(ctx.params.get("b").and_then(Value::as_i64), Some(99));
    }
}
