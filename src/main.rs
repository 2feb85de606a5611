use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use seller_onboard::blob::LocalBlobChannel;
use seller_onboard::config::OnboardingConfig;
use seller_onboard::onboarding::{OnboardingService, onboarding_routes};
use seller_onboard::store::LibSqlDocumentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OnboardingConfig::from_env().context("invalid onboarding configuration")?;

    let port: u16 = std::env::var("SELLER_ONBOARD_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let db_path = std::env::var("SELLER_ONBOARD_DB_PATH")
        .unwrap_or_else(|_| "./data/seller-onboard.db".to_string());
    let blob_dir = std::env::var("SELLER_ONBOARD_BLOB_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data/blobs"));
    let public_url = std::env::var("SELLER_ONBOARD_PUBLIC_URL")
        .unwrap_or_else(|_| format!("http://localhost:{port}/blobs"));

    eprintln!("Seller Onboard v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{port}/api/onboarding/status");
    eprintln!("   Events WS: ws://0.0.0.0:{port}/ws/onboarding");

    // ── Document store ──────────────────────────────────────────────────
    let store = LibSqlDocumentStore::new_local(std::path::Path::new(&db_path))
        .await
        .with_context(|| format!("failed to open database at {db_path}"))?;
    eprintln!("   Database: {db_path}");

    // ── Blob channel ────────────────────────────────────────────────────
    tokio::fs::create_dir_all(&blob_dir)
        .await
        .with_context(|| format!("failed to create blob directory {}", blob_dir.display()))?;
    let blob = LocalBlobChannel::new(&blob_dir, public_url.clone())
        .with_event_buffer(config.progress_buffer);
    eprintln!("   Blobs: {} (served at {public_url})", blob.root().display());
    let blob_files = ServeDir::new(blob.root());

    eprintln!(
        "   Limits: {} bytes per document, {:?} stall timeout\n",
        config.max_file_size, config.upload_stall_timeout
    );

    let service = Arc::new(OnboardingService::new(
        Arc::new(store),
        Arc::new(blob),
        config,
    ));

    let app = onboarding_routes(service)
        .nest_service("/blobs", blob_files)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    tracing::info!(port, "Seller onboarding server started");
    axum::serve(listener, app).await?;

    Ok(())
}
