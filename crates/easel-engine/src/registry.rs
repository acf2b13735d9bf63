//! In-memory registry of supervised engine processes.
//!
//! One mutex guards the record map and the used-port set together, so the
//! invariants hold at every observable instant: a model has at most one
//! record, a port belongs to at most one record, and the used-port set is
//! exactly the union of the records' ports.
//!
//! Only long-running `server` engines are registered; one-shot CLI
//! invocations own nothing beyond their argv and output path.

use std::collections::{HashMap, HashSet};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use easel_core::status::{ExecMode, ProcessStatus};
use easel_core::types::Timestamp;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Port scan range when the preferred port is taken.
pub const PORT_RANGE_START: u16 = 8000;
pub const PORT_RANGE_END: u16 = 9000;

/// How long SIGTERM gets before SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Runtime metadata for one live engine process.
#[derive(Clone)]
pub struct ProcessRecord {
    pub model_id: String,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub exec_mode: ExecMode,
    pub status: ProcessStatus,
    pub started_at: Timestamp,
    pub last_heartbeat_at: Option<Timestamp>,
    /// Shared handle to the child; taken by `kill`.
    child: Option<Arc<tokio::sync::Mutex<Child>>>,
    /// Cancelled when the process is being torn down.
    pub cancel: CancellationToken,
}

impl ProcessRecord {
    pub fn uptime_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0)
    }

    /// A record for an engine the registry does not track: CLI models have
    /// no resident process, so `start` hands back this placeholder.
    pub fn stub(model_id: &str, exec_mode: ExecMode) -> Self {
        Self {
            model_id: model_id.to_string(),
            pid: None,
            port: None,
            exec_mode,
            status: ProcessStatus::Stopped,
            started_at: Utc::now(),
            last_heartbeat_at: None,
            child: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for ProcessRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRecord")
            .field("model_id", &self.model_id)
            .field("pid", &self.pid)
            .field("port", &self.port)
            .field("exec_mode", &self.exec_mode)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryInner {
    records: HashMap<String, ProcessRecord>,
    used_ports: HashSet<u16>,
}

/// Thread-safe `model_id -> ProcessRecord` map with port bookkeeping.
#[derive(Default)]
pub struct ProcessRegistry {
    inner: Mutex<RegistryInner>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned child as `starting`.
    ///
    /// An existing record for the model is replaced; the caller must have
    /// terminated the previous child first. The port joins the used set.
    pub fn register(
        &self,
        model_id: &str,
        child: Child,
        port: u16,
        exec_mode: ExecMode,
    ) -> Result<ProcessRecord, EngineError> {
        if model_id.is_empty() {
            return Err(EngineError::ModelStartFailure(
                "cannot register a process without a model id".into(),
            ));
        }
        if exec_mode != ExecMode::Server {
            return Err(EngineError::ModelStartFailure(format!(
                "only server-mode processes are registered, got '{exec_mode}'"
            )));
        }

        let record = ProcessRecord {
            model_id: model_id.to_string(),
            pid: child.id(),
            port: Some(port),
            exec_mode,
            status: ProcessStatus::Starting,
            started_at: Utc::now(),
            last_heartbeat_at: None,
            child: Some(Arc::new(tokio::sync::Mutex::new(child))),
            cancel: CancellationToken::new(),
        };

        let mut inner = self.inner.lock().expect("registry poisoned");
        if let Some(old) = inner.records.remove(model_id) {
            if let Some(old_port) = old.port {
                inner.used_ports.remove(&old_port);
            }
        }
        inner.used_ports.insert(port);
        inner.records.insert(model_id.to_string(), record.clone());
        Ok(record)
    }

    /// Remove a record and release its port. Idempotent on absence.
    pub fn unregister(&self, model_id: &str) -> bool {
        let mut inner = self.inner.lock().expect("registry poisoned");
        match inner.records.remove(model_id) {
            Some(record) => {
                if let Some(port) = record.port {
                    inner.used_ports.remove(&port);
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, model_id: &str) -> Option<ProcessRecord> {
        self.inner
            .lock()
            .expect("registry poisoned")
            .records
            .get(model_id)
            .cloned()
    }

    pub fn get_by_port(&self, port: u16) -> Option<ProcessRecord> {
        self.inner
            .lock()
            .expect("registry poisoned")
            .records
            .values()
            .find(|r| r.port == Some(port))
            .cloned()
    }

    pub fn all(&self) -> Vec<ProcessRecord> {
        self.inner
            .lock()
            .expect("registry poisoned")
            .records
            .values()
            .cloned()
            .collect()
    }

    pub fn by_exec_mode(&self, mode: ExecMode) -> Vec<ProcessRecord> {
        self.inner
            .lock()
            .expect("registry poisoned")
            .records
            .values()
            .filter(|r| r.exec_mode == mode)
            .cloned()
            .collect()
    }

    /// True iff a record exists and is not `stopped`/`error`.
    pub fn is_running(&self, model_id: &str) -> bool {
        self.inner
            .lock()
            .expect("registry poisoned")
            .records
            .get(model_id)
            .map(|r| !matches!(r.status, ProcessStatus::Stopped | ProcessStatus::Error))
            .unwrap_or(false)
    }

    /// Record a heartbeat; a `starting` process becomes `running`.
    pub fn heartbeat(&self, model_id: &str) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        if let Some(record) = inner.records.get_mut(model_id) {
            record.last_heartbeat_at = Some(Utc::now());
            if record.status == ProcessStatus::Starting {
                record.status = ProcessStatus::Running;
            }
        }
    }

    pub fn update_status(&self, model_id: &str, status: ProcessStatus) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        if let Some(record) = inner.records.get_mut(model_id) {
            record.status = status;
        }
    }

    /// Terminate a model's child politely (SIGTERM, grace period, SIGKILL),
    /// reap it, and unregister the record.
    pub async fn kill(&self, model_id: &str) -> bool {
        let (child, pid, cancel) = {
            let mut inner = self.inner.lock().expect("registry poisoned");
            match inner.records.get_mut(model_id) {
                Some(record) => {
                    record.status = ProcessStatus::Stopping;
                    (record.child.take(), record.pid, record.cancel.clone())
                }
                None => return false,
            }
        };

        cancel.cancel();

        if let Some(child) = child {
            let mut child = child.lock().await;

            if let Some(pid) = pid {
                // Polite first: SIGTERM, then wait out the grace period.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
                match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                    Ok(_) => {}
                    Err(_) => {
                        tracing::warn!(model_id, pid, "SIGTERM grace expired, sending SIGKILL");
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
            } else {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }

        self.unregister(model_id)
    }

    /// Remove records whose child is `stopped` or whose PID no longer
    /// exists in the OS. Returns the ids that were reclaimed.
    pub fn cleanup_zombies(&self) -> Vec<String> {
        let mut inner = self.inner.lock().expect("registry poisoned");
        let dead: Vec<String> = inner
            .records
            .values()
            .filter(|r| {
                r.status == ProcessStatus::Stopped
                    || r.pid.map(|pid| !pid_alive(pid)).unwrap_or(false)
            })
            .map(|r| r.model_id.clone())
            .collect();

        for model_id in &dead {
            if let Some(record) = inner.records.remove(model_id) {
                if let Some(port) = record.port {
                    inner.used_ports.remove(&port);
                }
                tracing::info!(model_id, "reclaimed zombie process record");
            }
        }
        dead
    }

    /// Pick a bindable port: the preferred one when it is free both in the
    /// registry and on loopback, else the first free port in the scan range.
    ///
    /// The chosen port joins the used-port set immediately, so a second
    /// allocation cannot hand it out while the caller is still spawning.
    /// Call [`ProcessRegistry::release_port`] if the spawn never reaches
    /// `register`.
    pub fn allocate_port(&self, preferred: Option<u16>) -> Result<u16, EngineError> {
        let mut inner = self.inner.lock().expect("registry poisoned");

        if let Some(port) = preferred {
            if !inner.used_ports.contains(&port) && port_bindable(port) {
                inner.used_ports.insert(port);
                return Ok(port);
            }
        }

        for port in PORT_RANGE_START..=PORT_RANGE_END {
            if !inner.used_ports.contains(&port) && port_bindable(port) {
                inner.used_ports.insert(port);
                return Ok(port);
            }
        }
        Err(EngineError::PortExhausted(PORT_RANGE_START, PORT_RANGE_END))
    }

    /// Return an allocated port that never made it into a record.
    pub fn release_port(&self, port: u16) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        let held = inner.records.values().any(|r| r.port == Some(port));
        if !held {
            inner.used_ports.remove(&port);
        }
    }

    /// The ports currently reserved by live records.
    pub fn used_ports(&self) -> HashSet<u16> {
        self.inner.lock().expect("registry poisoned").used_ports.clone()
    }

    /// Check whether a model's child has already exited.
    ///
    /// Returns `Some(status)` once the child is gone, `None` while it is
    /// still alive (or when no child handle exists).
    pub async fn child_exit_status(&self, model_id: &str) -> Option<std::process::ExitStatus> {
        let child = {
            let inner = self.inner.lock().expect("registry poisoned");
            inner.records.get(model_id)?.child.clone()
        }?;
        let mut child = child.lock().await;
        child.try_wait().ok().flatten()
    }
}

/// Whether a port can be bound on loopback right now.
fn port_bindable(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Whether the OS still knows this PID (signal 0 probes without sending).
fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
