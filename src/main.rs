use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use content_studio::auth::UserRegistry;
use content_studio::config::Settings;
use content_studio::db::Database;
use content_studio::handlers::{self, AppState};
use content_studio::media::MediaLibrary;
use content_studio::providers::gemini::GeminiClient;
use content_studio::providers::pollinations::PollinationsClient;
use content_studio::storage::MediaStorage;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "content_studio=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000);
    let bind_address = format!("0.0.0.0:{}", port);
    let public_url = resolve_public_url(port);

    let settings = Settings::from_env();
    let users = UserRegistry::from_env()?;
    let data_dir = resolve_data_dir();
    let db = Database::open(&data_dir.join("content-studio.db"))?;

    let media_dir = data_dir.join("storage");
    let storage = MediaStorage::new(media_dir.clone(), public_url.clone());
    let gemini = GeminiClient::new(settings.gemini_api_key.clone());
    if !gemini.has_api_key() {
        tracing::warn!("GEMINI_API_KEY not set, text generation will be unavailable");
    }

    let state = Arc::new(AppState {
        users,
        db,
        media: MediaLibrary::new(storage, public_url.clone()),
        gemini,
        images: PollinationsClient::new(),
        http: reqwest::Client::new(),
        public_url,
        settings,
    });

    let router = handlers::router(state)
        // Keys are "media/<hash>.<ext>" relative to the storage root, so the
        // served directory already contains the media/ level.
        .nest_service("/media", ServeDir::new(media_dir.join("media")))
        .layer(TraceLayer::new_for_http());

    let tcp_listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(%bind_address, "content studio server started");

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

fn resolve_data_dir() -> PathBuf {
    let data_dir = env::var("DATA_DIR")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from);
    if let Some(dir) = data_dir {
        return dir;
    }
    let mut base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("content-studio");
    base
}

/// Base URL that appears in media and edit links. `DOMAIN` may be a bare host.
fn resolve_public_url(port: u16) -> String {
    let raw = env::var("DOMAIN")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| format!("localhost:{port}"));
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
