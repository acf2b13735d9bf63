/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local single-user install.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `127.0.0.1` -- the control plane is local).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// SQLite database URL (default: `sqlite://easel.db`).
    pub database_url: String,
    /// Path to the model config document (default: `models.toml`).
    pub models_config: String,
    /// Directory downloaded model files land in (default: `models`).
    pub models_dir: String,
    /// Model registry base URL (default: `https://huggingface.co`).
    pub registry_base: String,
    /// Allowed CORS origins, comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Processor poll interval in milliseconds (default: `1000`).
    pub processor_poll_ms: u64,
    /// Days before terminal download records are swept (default: `7`).
    pub download_retention_days: i64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                   |
    /// |---------------------------|---------------------------|
    /// | `HOST`                    | `127.0.0.1`               |
    /// | `PORT`                    | `3000`                    |
    /// | `DATABASE_URL`            | `sqlite://easel.db`       |
    /// | `EASEL_MODELS_CONFIG`     | `models.toml`             |
    /// | `EASEL_MODELS_DIR`        | `models`                  |
    /// | `EASEL_REGISTRY_BASE`     | `https://huggingface.co`  |
    /// | `CORS_ORIGINS`            | `http://localhost:5173`   |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                      |
    /// | `PROCESSOR_POLL_MS`       | `1000`                    |
    /// | `DOWNLOAD_RETENTION_DAYS` | `7`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://easel.db".into());

        let models_config =
            std::env::var("EASEL_MODELS_CONFIG").unwrap_or_else(|_| "models.toml".into());

        let models_dir = std::env::var("EASEL_MODELS_DIR").unwrap_or_else(|_| "models".into());

        let registry_base = std::env::var("EASEL_REGISTRY_BASE")
            .unwrap_or_else(|_| "https://huggingface.co".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let processor_poll_ms: u64 = std::env::var("PROCESSOR_POLL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("PROCESSOR_POLL_MS must be a valid u64");

        let download_retention_days: i64 = std::env::var("DOWNLOAD_RETENTION_DAYS")
            .unwrap_or_else(|_| "7".into())
            .parse()
            .expect("DOWNLOAD_RETENTION_DAYS must be a valid i64");

        Self {
            host,
            port,
            database_url,
            models_config,
            models_dir,
            registry_base,
            cors_origins,
            request_timeout_secs,
            processor_poll_ms,
            download_retention_days,
        }
    }
}
