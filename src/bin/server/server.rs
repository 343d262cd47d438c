//! HTTP server for label recognition.

use crate::config::ServerConfig;
use crate::ocr::{decode_image_payload, OcrEngine, OcrRequest, OcrResponse, SharedOcrEngine};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers
struct AppState {
    engine: SharedOcrEngine,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    tiers: usize,
}

/// Run the HTTP server
pub async fn run_server(
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Initializing recognition engine...");
    let engine = OcrEngine::new(&config.pipeline)?;
    let engine = Arc::new(engine);
    info!(
        "Engine ready with {} recognition tier(s)",
        engine.tier_count()
    );

    let state = Arc::new(AppState { engine });

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ocr", post(ocr_handler))
        .route("/api/v1/ocr", post(ocr_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Parse address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    info!("Server listening on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /health     - Health check");
    info!("  POST /ocr        - Label recognition");
    info!("  POST /api/v1/ocr - Label recognition (versioned API)");

    // Create listener
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tiers: state.engine.tier_count(),
    })
}

/// Label recognition endpoint
async fn ocr_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OcrRequest>,
) -> impl IntoResponse {
    let request_id = uuid::Uuid::new_v4().to_string();
    info!(
        request_id = %request_id,
        payload_bytes = request.image.len(),
        "Processing recognition request"
    );

    let start = Instant::now();

    // Decode image
    let image = match decode_image_payload(&request.image) {
        Ok(img) => img,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Failed to decode image payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(OcrResponse::error(format!("Failed to decode image: {}", e))),
            );
        }
    };

    let decode_time = start.elapsed();
    let (width, height) = (image.width(), image.height());
    info!(
        request_id = %request_id,
        width = width,
        height = height,
        decode_ms = decode_time.as_secs_f64() * 1000.0,
        "Image decoded"
    );

    // Recognition is CPU-bound; keep it off the async workers.
    let engine = Arc::clone(&state.engine);
    let result = match tokio::task::spawn_blocking(move || engine.process(&image)).await {
        Ok(r) => r,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Recognition task failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(OcrResponse::error("Recognition task failed".to_string())),
            );
        }
    };

    let total_time = start.elapsed();

    info!(
        request_id = %request_id,
        regions = result.regions.len(),
        confidence = result.confidence,
        ocr_ms = result.elapsed.as_secs_f64() * 1000.0,
        total_ms = total_time.as_secs_f64() * 1000.0,
        "Recognition completed"
    );

    let response = OcrEngine::result_to_response(&result, width, height);

    (StatusCode::OK, Json(response))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
