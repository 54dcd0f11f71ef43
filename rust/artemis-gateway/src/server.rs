//! Builds the process-wide [`crate::context::Runtime`] and the HTTP router
//! on top of it, with the staged startup logging this codebase uses
//! elsewhere (`OpTimer`, `log_init_step!`, `log_success!`).

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;

use crate::clients::DependentClientPool;
use crate::config::ConfigManager;
use crate::context::{CallbackPool, Runtime};
use crate::engine::TaskEngine;
use crate::gateway::{build_router, AppState};
use crate::logging::OpTimer;
use crate::registry::{TaskRegistry, UnitConstructor};
use crate::{log_init_step, log_success};

const REGISTRATIONS_FILENAME: &str = "config/registrations.yaml";
const STARTUP_STEPS: u32 = 4;

/// Everything needed to build the app: config path/env plus the
/// statically-linked constructors for static and (potentially) persisted
/// dynamic task codes. The embedding binary supplies both — this crate is
/// the execution substrate, not any particular set of task units.
pub struct AppConfig {
    pub config_path: Option<String>,
    pub config_env: Option<String>,
    pub static_units: Vec<(String, String, String, UnitConstructor)>,
    pub known_constructors: HashMap<(String, String), UnitConstructor>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("config_path", &self.config_path)
            .field("config_env", &self.config_env)
            .field("static_units", &self.static_units.iter().map(|(code, ..)| code).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Build the `Runtime` and the router on top of it. Returns the engine
/// alongside the router so the caller can join in-flight async workers on
/// graceful shutdown (§9).
pub fn create_app(app_config: AppConfig) -> anyhow::Result<(Router, Arc<TaskEngine>)> {
    let timer = OpTimer::new("server", "build_runtime");
    log_init_step!(1, STARTUP_STEPS, "Configuration", "loading layered YAML config");
    let config = ConfigManager::init(app_config.config_path.as_deref(), app_config.config_env.as_deref())?;

    log_init_step!(2, STARTUP_STEPS, "Task Registry", "registering static task units");
    let registry = TaskRegistry::new(REGISTRATIONS_FILENAME);
    for (code, module_ref, class_name, ctor) in app_config.static_units {
        registry.register(&code, module_ref, class_name, ctor, false)?;
    }

    log_init_step!(3, STARTUP_STEPS, "Task Registry", "loading persisted dynamic registrations");
    registry.load_persisted(&app_config.known_constructors)?;

    log_init_step!(4, STARTUP_STEPS, "HTTP Gateway", "building router");
    let runtime = Arc::new(Runtime {
        registry,
        config,
        client_pool: DependentClientPool::new(),
        callback_pool: CallbackPool::new(),
    });
    let engine = Arc::new(TaskEngine::new(runtime));
    let state = AppState { engine: engine.clone() };
    let router = build_router(state);

    timer.finish();
    log_success!("Artemis gateway built successfully");
    Ok((router, engine))
}
