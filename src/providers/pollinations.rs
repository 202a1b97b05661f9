use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;

use crate::error::StudioError;
use crate::providers::GeneratedImage;

const POLLINATIONS_BASE_URL: &str = "https://image.pollinations.ai";
const CRAIYON_API_URL: &str = "https://api.craiyon.com/v3";
const CRAIYON_VERSION: &str = "35s5hfwn9n78gb06";

/// Prompts above this are hard-truncated to protect URL-length and payload
/// limits on both backends.
const MAX_PROMPT_LEN: usize = 500;
/// Bodies under this are treated as corrupt/placeholder images.
const MIN_IMAGE_BYTES: usize = 1000;
const PRIMARY_ATTEMPTS: u32 = 3;
const PRIMARY_TIMEOUT: Duration = Duration::from_secs(60);
const BACKUP_TIMEOUT: Duration = Duration::from_secs(120);
const RETRY_PAUSE: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct CraiyonResponse {
    images: Option<Vec<String>>,
}

/// Image client: Pollinations.ai primary with a Craiyon fallback. Neither
/// backend needs an API key and neither offers an SLA, so every attempt is
/// traced for operational debugging.
#[derive(Clone, Debug)]
pub struct PollinationsClient {
    http: Client,
    primary_base: String,
    backup_url: String,
    retry_pause: Duration,
}

impl PollinationsClient {
    pub fn new() -> Self {
        Self::with_endpoints(
            POLLINATIONS_BASE_URL.to_string(),
            CRAIYON_API_URL.to_string(),
            RETRY_PAUSE,
        )
    }

    pub fn with_endpoints(primary_base: String, backup_url: String, retry_pause: Duration) -> Self {
        Self {
            http: Client::new(),
            primary_base: primary_base.trim_end_matches('/').to_string(),
            backup_url,
            retry_pause,
        }
    }

    pub async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, StudioError> {
        let clean_prompt = optimize_prompt(prompt);
        tracing::info!(prompt = %clean_prompt, "image generation started");

        match self.try_primary(&clean_prompt).await {
            Ok(image) => return Ok(image),
            Err(err) => {
                tracing::warn!(error = %err, "pollinations failed, trying craiyon backup");
            }
        }

        match self.try_backup(&clean_prompt).await {
            Ok(image) => Ok(image),
            Err(err) => {
                tracing::error!(error = %err, "all image services failed");
                Err(StudioError::AllProvidersFailed)
            }
        }
    }

    async fn try_primary(&self, prompt: &str) -> Result<GeneratedImage, StudioError> {
        let encoded = urlencoding::encode(prompt);
        // Fresh seed per generation so repeated prompts yield new images.
        let seed = Utc::now().timestamp();
        let url = format!(
            "{}/prompt/{}?width=1024&height=1024&seed={}&nologo=true&enhance=true",
            self.primary_base, encoded, seed
        );

        for attempt in 1..=PRIMARY_ATTEMPTS {
            if attempt > 1 {
                sleep(self.retry_pause).await;
            }
            let response = match self.http.get(&url).timeout(PRIMARY_TIMEOUT).send().await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "pollinations transport error");
                    continue;
                }
            };

            let status = response.status();
            if status != reqwest::StatusCode::OK {
                tracing::warn!(attempt, status = %status, "pollinations non-200 status");
                continue;
            }

            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "pollinations read body failed");
                    continue;
                }
            };
            if bytes.len() < MIN_IMAGE_BYTES {
                tracing::warn!(attempt, size = bytes.len(), "pollinations body too small");
                continue;
            }

            tracing::info!(attempt, size = bytes.len(), "pollinations success");
            return Ok(GeneratedImage {
                url: to_data_uri(&BASE64.encode(&bytes)),
                prompt: prompt.to_string(),
                model: "Pollinations.ai".to_string(),
                provider: "pollinations".to_string(),
            });
        }

        Err(StudioError::Provider(format!(
            "Pollinations.ai service temporarily unavailable after {PRIMARY_ATTEMPTS} attempts"
        )))
    }

    async fn try_backup(&self, prompt: &str) -> Result<GeneratedImage, StudioError> {
        tracing::info!("attempting craiyon backup service");
        let body = json!({
            "prompt": prompt,
            "version": CRAIYON_VERSION,
            "model": "art",
        });

        let response = self
            .http
            .post(&self.backup_url)
            .timeout(BACKUP_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "craiyon transport error");
                StudioError::Transport("Failed to connect to backup image service.".to_string())
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(status = %status, "craiyon non-200 status");
            return Err(StudioError::Provider(format!(
                "Backup image service returned status {status}"
            )));
        }

        let payload: CraiyonResponse = response.json().await.map_err(|err| {
            tracing::warn!(error = %err, "craiyon response decode failed");
            StudioError::Provider("No image data from backup service.".to_string())
        })?;

        let first = payload
            .images
            .and_then(|images| images.into_iter().next())
            .filter(|image| !image.is_empty())
            .ok_or_else(|| {
                StudioError::Provider("No image data from backup service.".to_string())
            })?;

        tracing::info!("craiyon success");
        Ok(GeneratedImage {
            // Craiyon replies are already base64.
            url: to_data_uri(&first),
            prompt: prompt.to_string(),
            model: "Craiyon AI".to_string(),
            provider: "craiyon-backup".to_string(),
        })
    }
}

impl Default for PollinationsClient {
    fn default() -> Self {
        Self::new()
    }
}

fn to_data_uri(base64_image: &str) -> String {
    format!("data:image/jpeg;base64,{base64_image}")
}

/// Collapses whitespace and hard-truncates oversized prompts.
pub fn optimize_prompt(prompt: &str) -> String {
    let collapsed = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.len() <= MAX_PROMPT_LEN {
        return collapsed;
    }
    let mut cut = MAX_PROMPT_LEN - 3;
    while !collapsed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &collapsed[..cut])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};

    use super::*;

    #[derive(Clone)]
    struct Script {
        hits: Arc<AtomicUsize>,
        responses: Arc<Vec<(u16, Vec<u8>)>>,
    }

    async fn scripted(State(script): State<Script>) -> (StatusCode, Vec<u8>) {
        let n = script.hits.fetch_add(1, Ordering::SeqCst);
        let (status, body) = script.responses[n.min(script.responses.len() - 1)].clone();
        (StatusCode::from_u16(status).unwrap(), body)
    }

    /// Spawns a fake backend whose nth request gets the nth scripted
    /// response (the last response repeats). Returns base URL and hit count.
    async fn spawn_backend(
        path: &'static str,
        is_post: bool,
        responses: Vec<(u16, Vec<u8>)>,
    ) -> (String, Arc<AtomicUsize>) {
        let script = Script {
            hits: Arc::new(AtomicUsize::new(0)),
            responses: Arc::new(responses),
        };
        let hits = script.hits.clone();
        let route = if is_post { post(scripted) } else { get(scripted) };
        let app = Router::new().route(path, route).with_state(script);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    fn client(primary: String, backup: String) -> PollinationsClient {
        PollinationsClient::with_endpoints(primary, backup, Duration::ZERO)
    }

    fn craiyon_ok() -> (u16, Vec<u8>) {
        (200, b"{\"images\": [\"QkFDS1VQ\"]}".to_vec())
    }

    #[tokio::test]
    async fn tiny_primary_bodies_fall_back_to_backup() {
        let (primary, primary_hits) =
            spawn_backend("/prompt/{*rest}", false, vec![(200, b"tiny".to_vec())]).await;
        let (backup, backup_hits) = spawn_backend("/", true, vec![craiyon_ok()]).await;

        let image = client(primary, backup)
            .generate_image("a red bicycle")
            .await
            .unwrap();

        assert_eq!(primary_hits.load(Ordering::SeqCst), 3);
        assert_eq!(backup_hits.load(Ordering::SeqCst), 1);
        assert_eq!(image.provider, "craiyon-backup");
        assert_eq!(image.model, "Craiyon AI");
        assert_eq!(image.url, "data:image/jpeg;base64,QkFDS1VQ");
    }

    #[tokio::test]
    async fn primary_success_on_retry_never_touches_backup() {
        let big_body = vec![0xFFu8; 4096];
        let (primary, primary_hits) = spawn_backend(
            "/prompt/{*rest}",
            false,
            vec![(500, Vec::new()), (200, big_body.clone())],
        )
        .await;
        let (backup, backup_hits) = spawn_backend("/", true, vec![craiyon_ok()]).await;

        let image = client(primary, backup)
            .generate_image("a red bicycle")
            .await
            .unwrap();

        assert_eq!(primary_hits.load(Ordering::SeqCst), 2);
        assert_eq!(backup_hits.load(Ordering::SeqCst), 0);
        assert_eq!(image.provider, "pollinations");
        assert_eq!(
            image.url,
            format!("data:image/jpeg;base64,{}", BASE64.encode(&big_body))
        );
    }

    #[tokio::test]
    async fn exhausting_both_tiers_is_all_providers_failed() {
        let (primary, _) =
            spawn_backend("/prompt/{*rest}", false, vec![(500, Vec::new())]).await;
        let (backup, _) = spawn_backend("/", true, vec![(500, Vec::new())]).await;

        let err = client(primary, backup)
            .generate_image("a red bicycle")
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::AllProvidersFailed));
    }

    #[tokio::test]
    async fn backup_without_images_is_all_providers_failed() {
        let (primary, _) =
            spawn_backend("/prompt/{*rest}", false, vec![(500, Vec::new())]).await;
        let (backup, _) =
            spawn_backend("/", true, vec![(200, b"{\"images\": []}".to_vec())]).await;

        let err = client(primary, backup)
            .generate_image("a red bicycle")
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::AllProvidersFailed));
    }

    #[test]
    fn prompt_whitespace_is_collapsed() {
        assert_eq!(optimize_prompt("  a   red\n\tbicycle "), "a red bicycle");
    }

    #[test]
    fn oversized_prompts_are_truncated_with_marker() {
        let long = "word ".repeat(200);
        let optimized = optimize_prompt(&long);
        assert_eq!(optimized.len(), MAX_PROMPT_LEN);
        assert!(optimized.ends_with("..."));
    }

    #[test]
    fn short_prompts_pass_through() {
        assert_eq!(optimize_prompt("a red bicycle"), "a red bicycle");
    }
}
