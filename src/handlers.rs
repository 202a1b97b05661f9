use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{CurrentUser, UserRegistry};
use crate::config::Settings;
use crate::db::{Database, HistoryRecord, NewHistoryEntry};
use crate::error::StudioError;
use crate::media::MediaLibrary;
use crate::prompt::{self, PromptInput};
use crate::providers::calculate_cost;
use crate::providers::gemini::GeminiClient;
use crate::providers::pollinations::PollinationsClient;
use crate::rate_limit;

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub settings: Settings,
    pub users: UserRegistry,
    pub db: Database,
    pub media: MediaLibrary,
    pub gemini: GeminiClient,
    pub images: PollinationsClient,
    pub http: reqwest::Client,
    pub public_url: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/generate-text", post(generate_text))
        .route("/api/generate-image", post(generate_image))
        .route("/api/describe-image", post(describe_image))
        .route("/api/upload-image", post(upload_image))
        .route("/api/save-post", post(save_post))
        .route("/api/history", get(get_history))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct GenerateTextRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub provider: Option<String>,
    pub tone: Option<String>,
    pub word_count: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateTextResponse {
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,
    pub word_count: usize,
    pub generation_time: f64,
    pub provider: String,
    pub tokens_used: u64,
}

async fn generate_text(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<GenerateTextRequest>,
) -> Result<Json<GenerateTextResponse>, StudioError> {
    if !user.can_edit_posts {
        return Err(StudioError::Permission(
            "You do not have permission to generate content.".to_string(),
        ));
    }

    let gate = rate_limit::check(&state.db, user.id, state.settings.rate_limit)?;
    if !gate.allowed {
        return Err(StudioError::RateLimit { limit: gate.limit });
    }

    let title = request.title.trim().to_string();
    if title.is_empty() {
        return Err(StudioError::Validation("Title is required.".to_string()));
    }
    let provider = request
        .provider
        .unwrap_or_else(|| state.settings.default_model.clone());
    if provider != "gemini" {
        return Err(StudioError::Validation(
            "Provider not supported yet.".to_string(),
        ));
    }
    if !state.settings.has_api_key(&provider) {
        return Err(StudioError::Config(
            "API key not configured for selected provider.".to_string(),
        ));
    }

    let tone = request
        .tone
        .unwrap_or_else(|| state.settings.default_tone.clone());
    let length = request
        .word_count
        .unwrap_or_else(|| state.settings.default_length.clone());
    let prompt = prompt::build_prompt(&PromptInput {
        title: &title,
        description: &request.description,
        tone: &tone,
        word_count: &length,
        include_meta: true,
    });

    let started = Instant::now();
    let result = state.gemini.generate_content(&prompt).await;
    let generation_time = round2(started.elapsed().as_secs_f64());

    match result {
        Ok(generation) => {
            let content = generation.reply.content().to_string();
            let word_count = prompt::count_words(&content);
            log_generation(&state, NewHistoryEntry {
                user_id: user.id,
                kind: "content".to_string(),
                title: title.clone(),
                provider: provider.clone(),
                model: generation.model.clone(),
                tone: tone.clone(),
                word_count: word_count as i64,
                tokens_used: generation.tokens_used as i64,
                cost: calculate_cost(&provider, generation.tokens_used),
                generation_time,
                status: "completed".to_string(),
            });
            Ok(Json(GenerateTextResponse {
                title,
                content,
                meta_description: generation.reply.meta_description().map(str::to_string),
                word_count,
                generation_time,
                provider,
                tokens_used: generation.tokens_used,
            }))
        }
        Err(err) => {
            log_generation(&state, NewHistoryEntry {
                user_id: user.id,
                kind: "content".to_string(),
                title,
                provider,
                model: state.gemini.model().to_string(),
                tone,
                word_count: 0,
                tokens_used: 0,
                cost: 0.0,
                generation_time,
                status: "failed".to_string(),
            });
            Err(err)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateImageRequest {
    pub prompt: String,
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateImageResponse {
    pub url: String,
    pub prompt: String,
    pub provider: String,
    pub model: String,
    pub size: String,
    pub generation_time: f64,
}

async fn generate_image(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<GenerateImageRequest>,
) -> Result<Json<GenerateImageResponse>, StudioError> {
    if !user.can_upload_files {
        return Err(StudioError::Permission(
            "You do not have permission to generate images.".to_string(),
        ));
    }

    let prompt = request.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(StudioError::Validation(
            "Image description is required.".to_string(),
        ));
    }
    let provider = request
        .provider
        .unwrap_or_else(|| "pollinations".to_string());
    if provider != "pollinations" {
        return Err(StudioError::Validation(
            "Invalid provider selected.".to_string(),
        ));
    }

    let started = Instant::now();
    let result = state.images.generate_image(&prompt).await;
    let generation_time = round2(started.elapsed().as_secs_f64());

    match result {
        Ok(image) => {
            log_generation(&state, NewHistoryEntry {
                user_id: user.id,
                kind: "image".to_string(),
                title: history_title(&prompt),
                provider: provider.clone(),
                model: image.model.clone(),
                tone: String::new(),
                word_count: 0,
                tokens_used: 0,
                cost: 0.0,
                generation_time,
                status: "completed".to_string(),
            });
            Ok(Json(GenerateImageResponse {
                url: image.url,
                prompt,
                provider,
                model: image.model,
                size: "1024x1024".to_string(),
                generation_time,
            }))
        }
        Err(err) => {
            log_generation(&state, NewHistoryEntry {
                user_id: user.id,
                kind: "image".to_string(),
                title: history_title(&prompt),
                provider,
                model: String::new(),
                tone: String::new(),
                word_count: 0,
                tokens_used: 0,
                cost: 0.0,
                generation_time,
                status: "failed".to_string(),
            });
            Err(err)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DescribeImageRequest {
    pub title: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct DescribeImageResponse {
    pub image_prompt: String,
}

async fn describe_image(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<DescribeImageRequest>,
) -> Result<Json<DescribeImageResponse>, StudioError> {
    if !user.can_edit_posts {
        return Err(StudioError::Permission(
            "You do not have permission to generate content.".to_string(),
        ));
    }
    let title = request.title.trim();
    if title.is_empty() {
        return Err(StudioError::Validation("Title is required.".to_string()));
    }

    let image_prompt = state.gemini.describe_image(title, &request.summary).await?;
    Ok(Json(DescribeImageResponse { image_prompt }))
}

#[derive(Debug, Deserialize)]
pub struct UploadImageRequest {
    pub image_url: String,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct UploadImageResponse {
    pub attachment_id: i64,
    pub url: String,
    pub edit_url: String,
    pub message: String,
}

async fn upload_image(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<UploadImageRequest>,
) -> Result<Json<UploadImageResponse>, StudioError> {
    if !user.can_upload_files {
        return Err(StudioError::Permission(
            "You do not have permission to upload files.".to_string(),
        ));
    }
    let image_url = request.image_url.trim();
    if image_url.is_empty() {
        return Err(StudioError::Validation("Image URL is required.".to_string()));
    }

    let asset = if image_url.starts_with("data:image") {
        state
            .media
            .ingest_data_uri(&state.db, user.id, image_url, &request.prompt)
            .await?
    } else {
        state
            .media
            .ingest_remote(&state.db, user.id, &state.http, image_url, &request.prompt)
            .await?
    };

    Ok(Json(UploadImageResponse {
        attachment_id: asset.attachment_id,
        url: asset.url,
        edit_url: asset.edit_url,
        message: "Image uploaded successfully!".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SavePostRequest {
    pub title: String,
    pub content: String,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SavePostResponse {
    pub post_id: i64,
    pub edit_url: String,
    pub message: String,
}

async fn save_post(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SavePostRequest>,
) -> Result<Json<SavePostResponse>, StudioError> {
    if !user.can_edit_posts {
        return Err(StudioError::Permission(
            "You do not have permission to save posts.".to_string(),
        ));
    }

    let title = request.title.trim();
    let content = request.content.trim();
    if title.is_empty() || content.is_empty() {
        return Err(StudioError::Validation(
            "Title and content are required.".to_string(),
        ));
    }

    let requested = request
        .status
        .unwrap_or_else(|| state.settings.auto_save.clone());
    // Anything outside the allowed set lands as a draft.
    let status = match requested.as_str() {
        "publish" => "publish",
        _ => "draft",
    };

    let post_id = state.db.insert_post(user.id, title, content, status)?;
    Ok(Json(SavePostResponse {
        post_id,
        edit_url: format!("{}/admin/posts/{post_id}", state.public_url),
        message: "Post saved successfully!".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, StudioError> {
    if !user.can_edit_posts {
        return Err(StudioError::Permission(
            "You do not have permission to view history.".to_string(),
        ));
    }

    let limit = query.limit.unwrap_or(20).max(0);
    let offset = query.offset.unwrap_or(0).max(0);
    let (history, total) = state.db.list_history(user.id, limit, offset)?;
    Ok(Json(HistoryResponse {
        history,
        total,
        limit,
        offset,
    }))
}

/// Appends one audit row, best-effort: a logging failure never fails the
/// request that generated successfully.
fn log_generation(state: &AppState, entry: NewHistoryEntry) {
    if !state.settings.enable_history {
        return;
    }
    if let Err(err) = state.db.insert_history(&entry) {
        tracing::warn!(error = %err, "failed to log generation");
    }
}

fn history_title(prompt: &str) -> String {
    prompt.chars().take(255).collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
