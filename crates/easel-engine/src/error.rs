//! Engine-layer errors.
//!
//! The variant names are the error kinds the processor records on failed
//! jobs, so `Display` output leads with the kind.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No descriptor with this id exists in the config document.
    #[error("UnknownModel: no model with id '{0}'")]
    UnknownModel(String),

    /// A start was requested while a record is `starting` or `running`.
    #[error("AlreadyRunning: model '{0}' has a live process")]
    AlreadyRunning(String),

    /// The child could not be spawned or died before becoming ready.
    #[error("ModelStartFailure: {0}")]
    ModelStartFailure(String),

    /// The readiness probe did not succeed within the deadline.
    #[error("StartupTimeout: model '{model_id}' not ready within {timeout_ms} ms")]
    StartupTimeout { model_id: String, timeout_ms: u64 },

    /// No bindable port in the configured range.
    #[error("PortExhausted: no free port in {0}-{1}")]
    PortExhausted(u16, u16),

    /// The child exited while a job was in flight.
    #[error("ProcessCrashed: {0}")]
    ProcessCrashed(String),

    /// The engine returned a non-2xx status.
    #[error("EngineHTTPError: status {status}: {body}")]
    EngineHttp { status: u16, body: String },

    /// The engine returned 2xx but the payload was not decodable.
    #[error("EngineBadResponse: {0}")]
    EngineBadResponse(String),

    /// A CLI invocation exited with a non-zero code.
    #[error("CLIExitNonZero: exit code {code}: {stderr}")]
    CliExitNonZero { code: i32, stderr: String },

    /// A CLI invocation succeeded but produced no readable output image.
    #[error("CLIOutputUnparseable: {0}")]
    CliOutputUnparseable(String),

    /// The HTTP request itself failed (connect, DNS, timeout).
    #[error("EngineHTTPError: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IOError: {0}")]
    Io(#[from] std::io::Error),

    #[error("DBError: {0}")]
    Db(#[from] sqlx::Error),

    /// The config document could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),
}
