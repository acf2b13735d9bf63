//! Model lifecycle manager.
//!
//! [`ModelManager`] mediates between the config document, the process
//! registry, and running engines: it spawns `server`-mode children with
//! captured output, probes them to readiness, exposes status views, stops
//! them politely, and mirrors everything into the database for external
//! visibility. State changes are published on the `models` topic.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use easel_core::status::{ExecMode, LoadMode, ProcessStatus};
use easel_db::repositories::{ModelRepo, ProcessRepo};
use easel_db::DbPool;
use easel_events::{Event, EventBus, Topic};
use serde::Serialize;
use tokio::process::Command;

use crate::config::{ModelDescriptor, ModelsConfig};
use crate::error::EngineError;
use crate::logs::EngineLogs;
use crate::registry::{ProcessRecord, ProcessRegistry};
use crate::server_api::EngineApi;

/// First readiness probe delay; doubles up to [`PROBE_INTERVAL_CAP`].
const PROBE_INTERVAL_START: Duration = Duration::from_millis(100);

/// Readiness probe interval ceiling.
const PROBE_INTERVAL_CAP: Duration = Duration::from_secs(1);

/// Upper bound on a single health probe, so a black-holed request cannot
/// push past the startup deadline.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Caller-side options for a start request.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Overrides the descriptor's `startup_timeout_ms`.
    pub timeout_ms: Option<u64>,
}

/// Status payload for one model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatusView {
    pub model_id: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub uptime_ms: Option<i64>,
    pub recent_logs: Vec<String>,
}

/// Spawns, supervises, and terminates engine processes.
pub struct ModelManager {
    config: ModelsConfig,
    registry: ProcessRegistry,
    pool: DbPool,
    events: Arc<EventBus>,
    logs: Mutex<HashMap<String, EngineLogs>>,
}

impl ModelManager {
    pub fn new(config: ModelsConfig, pool: DbPool, events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: ProcessRegistry::new(),
            pool,
            events,
            logs: Mutex::new(HashMap::new()),
        })
    }

    /// Load the config document and build a manager around it.
    pub async fn from_config_file(
        path: &Path,
        pool: DbPool,
        events: Arc<EventBus>,
    ) -> Result<Arc<Self>, EngineError> {
        let config = ModelsConfig::load(path).await?;
        Ok(Self::new(config, pool, events))
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Descriptor lookup, failing with `UnknownModel`.
    pub fn descriptor(&self, model_id: &str) -> Result<&ModelDescriptor, EngineError> {
        self.config
            .get(model_id)
            .ok_or_else(|| EngineError::UnknownModel(model_id.to_string()))
    }

    pub fn all(&self) -> &[ModelDescriptor] {
        &self.config.models
    }

    pub fn default_descriptor(&self) -> Option<&ModelDescriptor> {
        self.config.default_descriptor()
    }

    /// Ids of models with a live (non-stopped, non-errored) process.
    pub fn running(&self) -> Vec<String> {
        self.registry
            .all()
            .into_iter()
            .filter(|r| !matches!(r.status, ProcessStatus::Stopped | ProcessStatus::Error))
            .map(|r| r.model_id)
            .collect()
    }

    /// Mirror the config document into the `models` table, dropping rows
    /// for descriptors that no longer exist.
    pub async fn sync_mirror(&self) -> Result<(), EngineError> {
        let ids: Vec<String> = self.config.models.iter().map(|m| m.id.clone()).collect();
        for model in &self.config.models {
            ModelRepo::upsert(
                &self.pool,
                &easel_db::models::model::UpsertModel {
                    id: model.id.clone(),
                    name: model.name.clone(),
                    description: model.description.clone(),
                    exec_mode: model.exec_mode,
                    load_mode: model.load_mode,
                    api_url: model.api_url.clone(),
                    port: model.port.map(i64::from),
                    capabilities: model.capabilities.iter().map(|c| c.as_str().into()).collect(),
                    registry_repo: model.registry_repo.clone(),
                },
            )
            .await?;
        }
        ModelRepo::retain(&self.pool, &ids).await?;
        Ok(())
    }

    /// Start every `preload` server model, logging failures instead of
    /// aborting startup.
    pub async fn preload(self: &Arc<Self>) {
        for model in &self.config.models {
            if model.load_mode == LoadMode::Preload && model.exec_mode == ExecMode::Server {
                match self.start(&model.id, StartOptions::default()).await {
                    Ok(record) => {
                        tracing::info!(model_id = %model.id, port = ?record.port, "preloaded model");
                    }
                    Err(e) => {
                        tracing::error!(model_id = %model.id, error = %e, "preload failed");
                    }
                }
            }
        }
    }

    /// Start a model's engine and wait for readiness.
    ///
    /// For `cli` models this is a no-op returning a stub record; per-job
    /// invocations spawn their own process.
    pub async fn start(
        &self,
        model_id: &str,
        options: StartOptions,
    ) -> Result<ProcessRecord, EngineError> {
        let descriptor = self.descriptor(model_id)?;

        if descriptor.exec_mode == ExecMode::Cli {
            return Ok(ProcessRecord::stub(model_id, ExecMode::Cli));
        }

        if let Some(existing) = self.registry.get(model_id) {
            if matches!(existing.status, ProcessStatus::Starting | ProcessStatus::Running) {
                return Err(EngineError::AlreadyRunning(model_id.to_string()));
            }
            // A stopped/errored leftover: reclaim it before respawning.
            self.registry.unregister(model_id);
        }

        let port = self.registry.allocate_port(descriptor.port)?;
        let args = descriptor.resolved_args(port);

        tracing::info!(
            model_id,
            command = %descriptor.command,
            port,
            "spawning engine process",
        );

        let mut child = match Command::new(&descriptor.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.registry.release_port(port);
                return Err(EngineError::ModelStartFailure(format!(
                    "cannot spawn '{}': {e}",
                    descriptor.command
                )));
            }
        };

        // Drain both pipes into the model's log ring.
        let logs = self.logs_for(model_id);
        if let Some(stdout) = child.stdout.take() {
            logs.spawn_capture(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            logs.spawn_capture(stderr, "stderr");
        }

        let record = self.registry.register(model_id, child, port, ExecMode::Server)?;
        ProcessRepo::upsert(
            &self.pool,
            model_id,
            record.pid.map(i64::from),
            Some(i64::from(port)),
            ExecMode::Server,
            ProcessStatus::Starting,
        )
        .await?;
        self.publish_model_event("model.starting", model_id, ProcessStatus::Starting);

        let timeout_ms = descriptor.startup_timeout_ms(options.timeout_ms);
        let api_url = descriptor.resolved_api_url(port);

        match self.wait_ready(model_id, &api_url, timeout_ms).await {
            Ok(()) => {
                ProcessRepo::set_status(&self.pool, model_id, ProcessStatus::Running).await?;
                ProcessRepo::heartbeat(&self.pool, model_id).await?;
                self.publish_model_event("model.running", model_id, ProcessStatus::Running);
                self.registry
                    .get(model_id)
                    .ok_or_else(|| EngineError::ProcessCrashed(model_id.to_string()))
            }
            Err(e) => {
                tracing::warn!(model_id, error = %e, "engine did not become ready");
                self.registry.kill(model_id).await;
                ProcessRepo::remove(&self.pool, model_id).await?;
                self.publish_model_event("model.error", model_id, ProcessStatus::Error);
                Err(e)
            }
        }
    }

    /// Stop a model's engine: polite kill, registry and mirror cleanup.
    pub async fn stop(&self, model_id: &str) -> Result<bool, EngineError> {
        // Validate the id even when nothing is running.
        self.descriptor(model_id)?;

        self.registry.update_status(model_id, ProcessStatus::Stopping);
        let stopped = self.registry.kill(model_id).await;
        if stopped {
            ProcessRepo::remove(&self.pool, model_id).await?;
            self.publish_model_event("model.stopped", model_id, ProcessStatus::Stopped);
            tracing::info!(model_id, "engine stopped");
        }
        Ok(stopped)
    }

    /// Status view for one model.
    pub fn status(&self, model_id: &str) -> Result<ModelStatusView, EngineError> {
        self.descriptor(model_id)?;

        let record = self.registry.get(model_id);
        let recent_logs = self
            .logs
            .lock()
            .expect("log table poisoned")
            .get(model_id)
            .map(|l| l.snapshot())
            .unwrap_or_default();

        Ok(match record {
            Some(record) => ModelStatusView {
                model_id: model_id.to_string(),
                status: record.status,
                pid: record.pid,
                port: record.port,
                uptime_ms: Some(record.uptime_ms()),
                recent_logs,
            },
            None => ModelStatusView {
                model_id: model_id.to_string(),
                status: ProcessStatus::Stopped,
                pid: None,
                port: None,
                uptime_ms: None,
                recent_logs,
            },
        })
    }

    /// Guarantee a usable engine for a job: the API URL for `server` models
    /// (starting the engine if necessary), `None` for `cli` models.
    pub async fn ensure_running(&self, model_id: &str) -> Result<Option<String>, EngineError> {
        let descriptor = self.descriptor(model_id)?;
        if descriptor.exec_mode == ExecMode::Cli {
            return Ok(None);
        }

        if let Some(record) = self.registry.get(model_id) {
            if record.status == ProcessStatus::Running {
                let port = record.port.unwrap_or_default();
                return Ok(Some(descriptor.resolved_api_url(port)));
            }
        }

        match self.start(model_id, StartOptions::default()).await {
            Ok(record) => {
                let port = record.port.unwrap_or_default();
                Ok(Some(descriptor.resolved_api_url(port)))
            }
            Err(EngineError::AlreadyRunning(_)) => {
                // Raced with another starter; use whatever is registered.
                let record = self
                    .registry
                    .get(model_id)
                    .ok_or_else(|| EngineError::ProcessCrashed(model_id.to_string()))?;
                let port = record.port.unwrap_or_default();
                Ok(Some(descriptor.resolved_api_url(port)))
            }
            Err(e) => Err(e),
        }
    }

    /// Drop registry records whose children are gone, syncing the mirror.
    pub async fn cleanup_zombies(&self) -> Result<Vec<String>, EngineError> {
        let reclaimed = self.registry.cleanup_zombies();
        for model_id in &reclaimed {
            ProcessRepo::remove(&self.pool, model_id).await?;
            self.publish_model_event("model.stopped", model_id, ProcessStatus::Stopped);
        }
        Ok(reclaimed)
    }

    /// Stop every supervised engine. Called during shutdown.
    pub async fn shutdown(&self) {
        for record in self.registry.all() {
            tracing::info!(model_id = %record.model_id, "stopping engine");
            self.registry.kill(&record.model_id).await;
            let _ = ProcessRepo::remove(&self.pool, &record.model_id).await;
        }
    }

    // ---- private helpers ----

    /// Poll the engine's health endpoint until it answers or the deadline
    /// passes. The probe interval starts small and doubles up to a cap.
    async fn wait_ready(
        &self,
        model_id: &str,
        api_url: &str,
        timeout_ms: u64,
    ) -> Result<(), EngineError> {
        let api = EngineApi::new(api_url.to_string());
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut interval = PROBE_INTERVAL_START;

        loop {
            // A dead child can never become ready.
            if let Some(status) = self.registry.child_exit_status(model_id).await {
                let tail = self
                    .logs
                    .lock()
                    .expect("log table poisoned")
                    .get(model_id)
                    .map(|l| l.snapshot().join("\n"))
                    .unwrap_or_default();
                return Err(EngineError::ModelStartFailure(format!(
                    "engine exited during startup ({status}): {tail}"
                )));
            }

            // Probes never outlive the startup deadline: a hung /health on
            // a not-yet-ready engine must not stretch the timeout.
            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::StartupTimeout {
                    model_id: model_id.to_string(),
                    timeout_ms,
                });
            }
            let probe_timeout = PROBE_TIMEOUT.min(deadline - now);
            if let Ok(Ok(())) = tokio::time::timeout(probe_timeout, api.health()).await {
                self.registry.heartbeat(model_id);
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::StartupTimeout {
                    model_id: model_id.to_string(),
                    timeout_ms,
                });
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
            interval = (interval * 2).min(PROBE_INTERVAL_CAP);
        }
    }

    fn logs_for(&self, model_id: &str) -> EngineLogs {
        self.logs
            .lock()
            .expect("log table poisoned")
            .entry(model_id.to_string())
            .or_default()
            .clone()
    }

    fn publish_model_event(&self, event_type: &str, model_id: &str, status: ProcessStatus) {
        self.events.publish(
            Event::new(Topic::Models, event_type).with_payload(serde_json::json!({
                "model_id": model_id,
                "status": status,
            })),
        );
    }
}
