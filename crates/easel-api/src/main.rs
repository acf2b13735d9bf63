use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use easel_api::config::ServerConfig;
use easel_api::processor::JobProcessor;
use easel_api::{routes, state, ws};

use state::AppState;

/// Cadence of the zombie-process sweep.
const ZOMBIE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Cadence of the terminal-download retention sweep.
const DOWNLOAD_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let pool = easel_db::create_pool(&config.database_url)
        .await
        .expect("Failed to open database");
    tracing::info!(database_url = %config.database_url, "Database pool created");

    easel_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    easel_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    // --- Event bus ---
    let event_bus = Arc::new(easel_events::EventBus::new());

    // --- Model manager ---
    let model_manager = easel_engine::ModelManager::from_config_file(
        Path::new(&config.models_config),
        pool.clone(),
        Arc::clone(&event_bus),
    )
    .await
    .expect("Failed to load model configuration");
    model_manager
        .sync_mirror()
        .await
        .expect("Failed to mirror model catalogue");
    tracing::info!(models = model_manager.all().len(), "Model manager ready");

    // Preloaded engines come up before the processor starts claiming work.
    model_manager.preload().await;

    // --- Download engine ---
    let downloads = easel_downloader::DownloadEngine::new(
        pool.clone(),
        easel_downloader::RegistryClient::new(config.registry_base.clone()),
        Arc::clone(&event_bus),
        config.models_dir.clone().into(),
    );

    // --- WebSocket manager + heartbeat ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager));

    // --- Job processor ---
    let processor_cancel = tokio_util::sync::CancellationToken::new();
    let processor = JobProcessor::new(
        pool.clone(),
        Arc::clone(&model_manager),
        Arc::clone(&event_bus),
        Duration::from_millis(config.processor_poll_ms),
    );
    let processor_handle = {
        let cancel = processor_cancel.clone();
        tokio::spawn(async move { processor.run(cancel).await })
    };

    // --- Background sweeps (zombie processes, stale download records) ---
    let sweep_cancel = tokio_util::sync::CancellationToken::new();
    let sweep_handle = {
        let cancel = sweep_cancel.clone();
        let manager = Arc::clone(&model_manager);
        let downloads = Arc::clone(&downloads);
        let retention = chrono::Duration::days(config.download_retention_days);
        tokio::spawn(async move {
            let mut zombie_tick = tokio::time::interval(ZOMBIE_SWEEP_INTERVAL);
            let mut download_tick = tokio::time::interval(DOWNLOAD_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = zombie_tick.tick() => {
                        if let Err(e) = manager.cleanup_zombies().await {
                            tracing::error!(error = %e, "zombie sweep failed");
                        }
                    }
                    _ = download_tick.tick() => {
                        match downloads.cleanup(retention).await {
                            Ok(0) => {}
                            Ok(n) => tracing::info!(removed = n, "swept stale download records"),
                            Err(e) => tracing::error!(error = %e, "download sweep failed"),
                        }
                    }
                }
            }
        })
    };

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        model_manager: Arc::clone(&model_manager),
        downloads: Arc::clone(&downloads),
        event_bus: Arc::clone(&event_bus),
        ws_manager: Arc::clone(&ws_manager),
    };

    // --- Router ---
    let request_id_header = HeaderName::from_static("x-request-id");
    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::api_routes())
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(build_cors_layer(&config))
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop claiming new jobs first; an in-flight engine call is abandoned.
    processor_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), processor_handle).await;
    tracing::info!("Job processor stopped");

    sweep_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweep_handle).await;

    // Engines next, while the registry is still intact.
    model_manager.shutdown().await;
    tracing::info!("Engines stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server shuts
/// down cleanly whether stopped interactively or by a process manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Build the CORS middleware layer from server configuration.
///
/// Panics at startup if any configured origin is invalid; misconfiguration
/// should fail fast.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(3600))
}
