use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::ImageFormat;
use url::Url;

use crate::db::Database;
use crate::error::StudioError;
use crate::storage::MediaStorage;

/// A media row plus where to find it.
#[derive(Debug)]
pub struct MediaAsset {
    pub attachment_id: i64,
    pub url: String,
    pub edit_url: String,
}

/// Media-library collaborator: validates image bytes, writes them to local
/// storage and records a media row.
pub struct MediaLibrary {
    storage: MediaStorage,
    admin_base: String,
}

impl MediaLibrary {
    pub fn new(storage: MediaStorage, admin_base: String) -> Self {
        Self {
            storage,
            admin_base: admin_base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn ingest_bytes(
        &self,
        db: &Database,
        user_id: i64,
        bytes: &[u8],
        title: &str,
    ) -> Result<MediaAsset, StudioError> {
        let mime_type = detect_mime_type(bytes).ok_or_else(|| {
            StudioError::Validation("Unsupported image format.".to_string())
        })?;
        let (width, height) = probe_dimensions(bytes, mime_type)?;

        let key = MediaStorage::media_key(bytes, extension_for_mime(mime_type));
        // Keys are content-addressed, so identical bytes are stored once.
        if !self.storage.exists(&key).await.unwrap_or(false) {
            self.storage.put(&key, bytes).await.map_err(|err| {
                tracing::error!(error = %err, key, "failed to store media bytes");
                StudioError::Persistence("Failed to upload to media library.".to_string())
            })?;
        }

        let attachment_id = db.insert_media(user_id, title, &key, mime_type, width, height)?;
        tracing::info!(attachment_id, key, "media asset ingested");

        Ok(MediaAsset {
            attachment_id,
            url: self.storage.public_url(&key),
            edit_url: format!("{}/admin/media/{attachment_id}", self.admin_base),
        })
    }

    /// Ingests an inline `data:image/...;base64,` URI. The decoded payload
    /// goes through a scoped temp file that is removed on every exit path.
    pub async fn ingest_data_uri(
        &self,
        db: &Database,
        user_id: i64,
        data_uri: &str,
        title: &str,
    ) -> Result<MediaAsset, StudioError> {
        let bytes = decode_data_uri(data_uri)?;

        let tmp = tempfile::NamedTempFile::new().map_err(|err| {
            tracing::error!(error = %err, "failed to create temp file");
            StudioError::Persistence("Failed to upload to media library.".to_string())
        })?;
        std::fs::write(tmp.path(), &bytes).map_err(|err| {
            tracing::error!(error = %err, "failed to write temp file");
            StudioError::Persistence("Failed to upload to media library.".to_string())
        })?;

        let staged = std::fs::read(tmp.path()).map_err(|err| {
            tracing::error!(error = %err, "failed to read temp file");
            StudioError::Persistence("Failed to upload to media library.".to_string())
        })?;

        // `tmp` is dropped (and the file deleted) whether or not this
        // succeeds.
        self.ingest_bytes(db, user_id, &staged, title).await
    }

    /// Downloads a remote image and ingests it.
    pub async fn ingest_remote(
        &self,
        db: &Database,
        user_id: i64,
        http: &reqwest::Client,
        image_url: &str,
        title: &str,
    ) -> Result<MediaAsset, StudioError> {
        let validated = validate_http_url(image_url)?;
        let response = http.get(validated).send().await.map_err(|err| {
            tracing::error!(error = %err, "failed to download image");
            StudioError::Transport("Failed to download image.".to_string())
        })?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = %status, "image download returned error status");
            return Err(StudioError::Transport("Failed to download image.".to_string()));
        }
        let bytes = response.bytes().await.map_err(|err| {
            tracing::error!(error = %err, "failed to read downloaded image");
            StudioError::Transport("Failed to download image.".to_string())
        })?;

        self.ingest_bytes(db, user_id, &bytes, title).await
    }
}

pub fn validate_http_url(raw: &str) -> Result<Url, StudioError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StudioError::Validation("Image URL is required.".to_string()));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|_| StudioError::Validation("Invalid image URL.".to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(StudioError::Validation(
            "Only http and https URLs are allowed.".to_string(),
        )),
    }
}

/// Decodes a `data:image/<type>;base64,<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, StudioError> {
    let rest = uri
        .strip_prefix("data:image/")
        .ok_or_else(|| StudioError::Validation("Invalid image format.".to_string()))?;
    let (_, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| StudioError::Validation("Invalid image format.".to_string()))?;
    BASE64
        .decode(payload.trim())
        .map_err(|_| StudioError::Validation("Invalid base64 image data.".to_string()))
}

pub fn detect_mime_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"BM") {
        return Some("image/bmp");
    }
    None
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}

fn mime_to_format(mime_type: &str) -> Option<ImageFormat> {
    match mime_type {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" => Some(ImageFormat::Jpeg),
        "image/gif" => Some(ImageFormat::Gif),
        "image/webp" => Some(ImageFormat::WebP),
        "image/bmp" => Some(ImageFormat::Bmp),
        _ => None,
    }
}

/// Decodes the image to prove it is intact and reports its dimensions.
fn probe_dimensions(bytes: &[u8], mime_type: &str) -> Result<(u32, u32), StudioError> {
    let format = mime_to_format(mime_type)
        .ok_or_else(|| StudioError::Validation("Unsupported image format.".to_string()))?;
    let decoded = image::load_from_memory_with_format(bytes, format).map_err(|err| {
        tracing::warn!(error = %err, "image decode failed");
        StudioError::Validation("Corrupt image data.".to_string())
    })?;
    Ok((decoded.width(), decoded.height()))
}

#[cfg(test)]
pub const TINY_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";
