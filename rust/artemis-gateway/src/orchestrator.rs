//! Orchestrator task unit: plans child specs and fans out sequentially,
//! reusing the parent's identity and clients (§4.6, §9).

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::TaskContext;
use crate::error::ArtemisError;
use crate::task_unit::{run_unit, TaskUnit};

/// `{key: task_code, params}` (§4.6 step 1).
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub key: String,
    pub params: Map<String, Value>,
}

/// Produces the list of children to run for a given parent context. The
/// only thing an orchestrator unit customizes.
#[async_trait]
pub trait OrchestratorPlan: Send {
    async fn plan(&mut self, ctx: &mut TaskContext) -> Result<Vec<ChildSpec>, ArtemisError>;
}

/// A `TaskUnit` whose `execute` phase is plan-then-fan-out instead of direct
/// work. Children run sequentially (§5's scheduling model; §9(a)'s decision).
pub struct OrchestratorUnit<P: OrchestratorPlan> {
    plan: P,
}

impl<P: OrchestratorPlan> OrchestratorUnit<P> {
    pub fn new(plan: P) -> Self {
        Self { plan }
    }
}

impl<P: OrchestratorPlan> std::fmt::Debug for OrchestratorUnit<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorUnit").finish_non_exhaustive()
    }
}

#[async_trait]
impl<P: OrchestratorPlan + Send> TaskUnit for OrchestratorUnit<P> {
    async fn execute(&mut self, ctx: &mut TaskContext) -> Result<Value, ArtemisError> {
        let children = self.plan.plan(ctx).await?;
        let total = children.len() as u32;
        ctx.mark_child_total(total);

        if let Some(callback) = ctx.callback.clone() {
            callback
                .progress(&ctx.run_id, 0, total, &format!("children 0/{total} start"))
                .await;
        }

        for child_spec in children {
            let mut child_ctx = ctx.make_child(child_spec.key.clone(), child_spec.params);
            let ctor = child_ctx.unit_ctor.clone().ok_or_else(|| {
                ArtemisError::UnknownTask(child_spec.key.clone())
            })?;
            let mut child_unit = ctor();
            run_unit(child_unit.as_mut(), &mut child_ctx).await;

            if child_ctx.status().is_terminal() && child_ctx.error.is_none() {
                ctx.inc_child_completed();
                let completed = ctx.children_completed;
                if let Some(callback) = ctx.callback.clone() {
                    callback
                        .progress(
                            &ctx.run_id,
                            completed,
                            total,
                            &format!("children {completed}/{total} done"),
                        )
                        .await;
                }
            } else {
                let message = child_ctx.error.clone().unwrap_or_else(|| "child failed".to_string());
                tracing::warn!(
                    run_id = %ctx.run_id,
                    task_code = %ctx.task_code,
                    child = %child_spec.key,
                    error = %message,
                    "child_failure"
                );
                ctx.stat("children_total", Value::from(ctx.children_total));
                ctx.stat("children_completed", Value::from(ctx.children_completed));
                return Err(ArtemisError::Phase(message));
            }
        }

        ctx.stat("children_total", Value::from(ctx.children_total));
        ctx.stat("children_completed", Value::from(ctx.children_completed));
        Ok(Value::Null)
    }
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

    struct ChildUnit;
    #[async_trait::async_trait]
    impl TaskUnit for ChildUnit {
        async fn execute(&mut self, _ctx: &mut TaskContext) -> Result<Value, ArtemisError> {
            Ok(Value::Null)
        }
    }

    struct ThreeChildrenPlan;
    #[async_trait::async_trait]
    impl OrchestratorPlan for ThreeChildrenPlan {
        async fn plan(&mut self, _ctx: &mut TaskContext) -> Result<Vec<ChildSpec>, ArtemisError> {
            Ok(vec![
                ChildSpec { key: "C".into(), params: Map::new() },
                ChildSpec { key: "C".into(), params: Map::new() },
                ChildSpec { key: "C".into(), params: Map::new() },
            ])
        }
    }

    fn runtime_with_child_registered(dir: &std::path::Path) -> Arc<Runtime> {
        let registry = TaskRegistry::new(dir.join("registrations.yaml"));
        registry
            .register("C", "artemis.tasks", "ChildUnit", std::sync::Arc::new(|| Box::new(ChildUnit)), false)
            .unwrap();
        Arc::new(Runtime {
            registry,
            config: ConfigManager::init(Some(dir.join("config.yaml").to_str().unwrap()), None).unwrap(),
            client_pool: DependentClientPool::new(),
            callback_pool: CallbackPool::new(),
        })
    }

    fn meta_fixture() -> TaskMeta {
        TaskMeta {
            run_id: IdValue::Int(5),
            task_id: IdValue::Int(1),
            task_code: "T5".into(),
            exec_type: ExecType::Sync,
            callback_endpoints: None,
        }
    }

    #[tokio::test]
    async fn s5_orchestrator_runs_all_children_and_counts_them() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_child_registered(dir.path());
        let mut ctx = TaskContext::new("T5".into(), &meta_fixture(), Map::new(), runtime);
        let mut unit = OrchestratorUnit::new(ThreeChildrenPlan);
        run_unit(&mut unit, &mut ctx).await;

        assert_eq!(ctx.status().as_str(), "SUCCESS");
        assert_eq!(ctx.children_total, 3);
        assert_eq!(ctx.children_completed, 3);
    }
}
