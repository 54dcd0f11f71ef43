//! Layered configuration for the Artemis gateway.
//!
//! Loads a base YAML file and, if a sibling `config.<env>.yaml` exists,
//! shallow-merges it over the base (overlay keys win at the top level only —
//! this is deliberately not a deep merge). `ARTEMIS_CONFIG` supplies the base
//! path when no explicit path is given; `ARTEMIS_ENV` supplies the env name.
//! Reload is explicit: the cache is treated as immutable between calls to
//! [`ConfigManager::reload`].

pub mod error;
pub mod variants;

pub use error::{ConfigResult, ConfigurationError};
pub use variants::{Variant, TaskVariantsRoot};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ArtemisError;

const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";
const TASK_VARIANTS_FILENAME: &str = "task.yaml";

/// Top-level configuration document (§3 `ConfigRoot`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigRoot {
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub http_client: HttpClientConfig,
    #[serde(default)]
    pub dept_services: HashMap<String, DeptServiceConfig>,
    #[serde(default)]
    pub task_defaults: HashMap<String, Map<String, Value>>,
    #[serde(default)]
    pub output_defaults: Map<String, Value>,
    /// Legacy top-level `callback.{host,port}` block, mapped into
    /// `dept_services.cronjob` at load time when the modern key is absent.
    #[serde(default)]
    pub callback: Option<LegacyCallbackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub otlp_enabled: bool,
    pub otlp_endpoint: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            otlp_enabled: false,
            otlp_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    5
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeptServiceConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl DeptServiceConfig {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.port.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyCallbackConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub override_host: Option<String>,
    pub override_port: Option<u16>,
}

struct Cached {
    root: ConfigRoot,
    variants: TaskVariantsRoot,
    path: PathBuf,
    env: Option<String>,
}

/// Loads, caches, and serves the layered YAML configuration.
pub struct ConfigManager {
    inner: RwLock<Cached>,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager").finish_non_exhaustive()
    }
}

impl ConfigManager {
    /// Load configuration, resolving `path`/`env` against `ARTEMIS_CONFIG`
    /// and `ARTEMIS_ENV` when not given explicitly.
    pub fn init(path: Option<&str>, env: Option<&str>) -> anyhow::Result<Self> {
        let path = resolve_path(path);
        let env = resolve_env(env);
        let (root, variants) = load(&path, env.as_deref())?;
        Ok(Self {
            inner: RwLock::new(Cached {
                root,
                variants,
                path,
                env,
            }),
        })
    }

    /// Reload if `force`, or if the resolved path/env differ from the cache.
    pub fn reload(&self, path: Option<&str>, env: Option<&str>, force: bool) -> anyhow::Result<()> {
        let path = resolve_path(path);
        let env = resolve_env(env);

        {
            let cached = self.inner.read();
            if !force && cached.path == path && cached.env == env {
                return Ok(());
            }
        }

        let (root, variants) = load(&path, env.as_deref())?;
        let mut cached = self.inner.write();
        *cached = Cached {
            root,
            variants,
            path,
            env,
        };
        Ok(())
    }

    /// A snapshot of the currently-loaded configuration.
    #[must_use]
    pub fn current(&self) -> ConfigRoot {
        self.inner.read().root.clone()
    }

    /// `task_defaults[code]`, or an empty map if the task has no defaults.
    #[must_use]
    pub fn task_default(&self, code: &str) -> Map<String, Value> {
        self.inner
            .read()
            .root
            .task_defaults
            .get(code)
            .cloned()
            .unwrap_or_default()
    }

    /// Resolve the matching variant config for `code` against `incoming`.
    pub fn task_variant(
        &self,
        code: &str,
        incoming: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ArtemisError> {
        self.inner.read().variants.resolve(code, incoming)
    }
}

fn resolve_path(path: Option<&str>) -> PathBuf {
    path.map(PathBuf::from)
        .or_else(|| std::env::var("ARTEMIS_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn resolve_env(env: Option<&str>) -> Option<String> {
    env.map(str::to_string)
        .or_else(|| std::env::var("ARTEMIS_ENV").ok())
        .filter(|e| !e.is_empty())
}

/// Load the base file, merge the env overlay if present, apply legacy
/// mapping, and separately load the task-variants file.
fn load(path: &Path, env: Option<&str>) -> anyhow::Result<(ConfigRoot, TaskVariantsRoot)> {
    let base = read_yaml_mapping(path)?;

    let merged = if let Some(env) = env {
        let overlay_path = overlay_path_for(path, env);
        match read_yaml_mapping(&overlay_path)? {
            Some(overlay) => shallow_merge(base.unwrap_or_default(), overlay),
            None => base.unwrap_or_default(),
        }
    } else {
        base.unwrap_or_default()
    };

    validate_task_code_keys(&merged)?;

    let mut root: ConfigRoot = serde_json::from_value(Value::Object(yaml_mapping_to_json(merged)))
        .unwrap_or_default();
    apply_legacy_callback_mapping(&mut root);

    let variants_path = path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(TASK_VARIANTS_FILENAME);
    let variants = match read_yaml_mapping(&variants_path)? {
        Some(v) => serde_yaml::from_value(serde_yaml::Value::Mapping(v)).unwrap_or_default(),
        None => TaskVariantsRoot::default(),
    };

    Ok((root, variants))
}

fn overlay_path_for(base: &Path, env: &str) -> PathBuf {
    base.parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("config.{env}.yaml"))
}

/// Read a YAML file as a top-level mapping. A missing file yields `Ok(None)`
/// (not fatal, per §4.1); a malformed file is a hard error surfaced as a
/// [`ConfigurationError`] with a fix hint, per §10.3.
fn read_yaml_mapping(path: &Path) -> anyhow::Result<Option<serde_yaml::Mapping>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let value: serde_yaml::Value = serde_yaml::from_str(&contents).map_err(|e| {
                ConfigurationError::invalid(
                    format!("malformed YAML at {}: {e}", path.display()),
                    "fix the YAML syntax error at the reported line, or remove the file to fall back to defaults",
                )
            })?;
            match value {
                serde_yaml::Value::Mapping(map) => Ok(Some(map)),
                serde_yaml::Value::Null => Ok(Some(serde_yaml::Mapping::new())),
                _ => Err(ConfigurationError::invalid(
                    format!("expected a YAML mapping at top level of {}", path.display()),
                    "wrap the file's contents in a top-level `key: value` mapping",
                )
                .into()),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!("reading {}: {e}", path.display())),
    }
}

/// Task codes used as keys in `task_defaults`/`output_defaults` must be YAML
/// strings (§10.3's "non-string task codes" startup-validation case).
fn validate_task_code_keys(merged: &serde_yaml::Mapping) -> Result<(), ConfigurationError> {
    for section in ["task_defaults", "output_defaults"] {
        let Some(serde_yaml::Value::Mapping(inner)) = merged.get(section) else {
            continue;
        };
        for key in inner.keys() {
            if !matches!(key, serde_yaml::Value::String(_)) {
                return Err(ConfigurationError::invalid(
                    format!("{section} has a non-string task code key: {key:?}"),
                    "quote the task code so it parses as a YAML string, e.g. \"T1\": {{ ... }}",
                ));
            }
        }
    }
    Ok(())
}

/// Overlay keys replace base keys wholesale at the top level; nested maps are
/// not merged recursively.
fn shallow_merge(mut base: serde_yaml::Mapping, overlay: serde_yaml::Mapping) -> serde_yaml::Mapping {
    for (key, value) in overlay {
        base.insert(key, value);
    }
    base
}

fn yaml_mapping_to_json(mapping: serde_yaml::Mapping) -> Map<String, Value> {
    let value = serde_yaml::Value::Mapping(mapping);
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

/// §9(b): `dept_services` is authoritative; map legacy `callback.*` in only
/// when `dept_services.cronjob` is absent or empty.
fn apply_legacy_callback_mapping(root: &mut ConfigRoot) {
    let needs_mapping = root
        .dept_services
        .get("cronjob")
        .map(DeptServiceConfig::is_empty)
        .unwrap_or(true);

    if !needs_mapping {
        return;
    }

    if let Some(legacy) = &root.callback {
        let host = legacy.host.clone().or_else(|| legacy.override_host.clone());
        let port = legacy.port.or(legacy.override_port);
        if host.is_some() || port.is_some() {
            root.dept_services
                .insert("cronjob".to_string(), DeptServiceConfig { host, port });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn missing_base_file_is_empty_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.yaml");
        let (root, _) = load(&path, None).unwrap();
        assert_eq!(root.server.port, 8080);
    }

    #[test]
    fn malformed_yaml_is_fatal_with_actionable_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(&dir, "config.yaml", "server: [this is not: a mapping");
        let err = load(&path, None).unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
        assert!(err.to_string().contains("How to fix"));
    }

    #[test]
    fn non_string_task_code_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(&dir, "config.yaml", "task_defaults:\n  123: {a: 1}\n");
        let err = load(&path, None).unwrap_err();
        assert!(err.to_string().contains("non-string task code"));
    }

    #[test]
    fn overlay_shallow_merges_top_level_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_tmp(
            &dir,
            "config.yaml",
            "server:\n  host: 0.0.0.0\n  port: 8080\nenv: base\n",
        );
        write_tmp(
            &dir,
            "config.staging.yaml",
            "server:\n  port: 9090\n",
        );
        let (root, _) = load(&base, Some("staging")).unwrap();
        // Overlay replaces the whole `server` key; `host` is NOT preserved
        // from the base because the merge is shallow, not deep.
        assert_eq!(root.server.port, 9090);
        assert_eq!(root.server.host, default_host());
    }

    #[test]
    fn legacy_callback_maps_into_dept_services_when_modern_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(
            &dir,
            "config.yaml",
            "callback:\n  host: cron.internal\n  port: 9000\n",
        );
        let (root, _) = load(&path, None).unwrap();
        let cronjob = root.dept_services.get("cronjob").unwrap();
        assert_eq!(cronjob.host.as_deref(), Some("cron.internal"));
        assert_eq!(cronjob.port, Some(9000));
    }

    #[test]
    fn legacy_host_wins_over_legacy_override_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(
            &dir,
            "config.yaml",
            "callback:\n  host: plain.internal\n  port: 9000\n  override_host: override.internal\n  override_port: 9001\n",
        );
        let (root, _) = load(&path, None).unwrap();
        let cronjob = root.dept_services.get("cronjob").unwrap();
        assert_eq!(cronjob.host.as_deref(), Some("plain.internal"));
        assert_eq!(cronjob.port, Some(9000));
    }

    #[test]
    fn modern_dept_services_wins_over_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(
            &dir,
            "config.yaml",
            "callback:\n  host: legacy.internal\n  port: 1\n\
             dept_services:\n  cronjob:\n    host: modern.internal\n    port: 2\n",
        );
        let (root, _) = load(&path, None).unwrap();
        let cronjob = root.dept_services.get("cronjob").unwrap();
        assert_eq!(cronjob.host.as_deref(), Some("modern.internal"));
    }
}
