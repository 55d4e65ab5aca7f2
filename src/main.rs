use skillswap_server::api::{self, AppState, SharedState};
use skillswap_server::blob::{BlobStore, DirBlobStore};
use skillswap_server::exchange::Exchange;
use skillswap_server::local_store::LocalStore;
use skillswap_server::persist::SaveFile;
use skillswap_server::settings::Settings;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};

fn init_tracing() {
    #[cfg(feature = "profile-console")]
    {
        console_subscriber::init();
    }

    #[cfg(not(feature = "profile-console"))]
    {
        use tracing_subscriber::EnvFilter;
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let settings = Settings::load().unwrap_or_else(|e| {
        warn!("{e}; using default settings");
        Settings::default()
    });

    // ── Boot the store ─────────────────────────────────────────
    let save_file = SaveFile::open(&settings.save_file).expect("Failed to open save file");
    let store = LocalStore::open(save_file).expect("Failed to load save file");
    info!(
        save_file = %settings.save_file,
        documents = store.document_count(),
        revision = store.revision(),
        "store loaded"
    );

    let blobs: Arc<dyn BlobStore> = Arc::new(
        DirBlobStore::open(&settings.blob_dir, &settings.public_base_url)
            .expect("Failed to open blob directory"),
    );

    // ── Shared state ───────────────────────────────────────────
    let state: SharedState = Arc::new(AppState {
        exchange: Exchange::new(store, blobs, settings.college.clone()),
        demo_user: settings.demo_user.clone(),
    });

    // ── Router ─────────────────────────────────────────────────
    let app = api::router(state)
        .nest_service("/files", ServeDir::new(&settings.blob_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // ── Start ──────────────────────────────────────────────────
    let addr = settings.socket_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");
    info!("Server running on http://{addr}");
    info!("  API:   http://{addr}/api/tasks");
    info!("  Files: {}", settings.public_base_url);

    axum::serve(listener, app).await.expect("Server error");
}
