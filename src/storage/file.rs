//! File storage for generated images

use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::Result;
use crate::storage::base64;

/// Extensions the post-processing stages know how to pick up from a directory
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "svg"];

/// Writes generated images under a fixed directory
#[derive(Debug, Clone)]
pub struct ImageStore {
    storage_path: PathBuf,
}

impl ImageStore {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }

    /// Ensure the storage directory exists
    pub async fn ensure_storage_dir(&self) -> Result<()> {
        if !self.storage_path.exists() {
            fs::create_dir_all(&self.storage_path).await?;
            debug!(path = ?self.storage_path, "Created storage directory");
        }
        Ok(())
    }

    /// Save raw image bytes as `{prompt_id}_{model}_{timestamp}.{ext}`
    pub async fn save(
        &self,
        prompt_id: &str,
        model: &str,
        data: &[u8],
        extension: &str,
    ) -> Result<PathBuf> {
        self.ensure_storage_dir().await?;

        let filename = generate_filename(prompt_id, model, extension);
        let file_path = self.storage_path.join(&filename);

        fs::write(&file_path, data).await?;

        info!(
            file = %filename,
            size_kb = format!("{:.1}", data.len() as f64 / 1024.0),
            "Saved image"
        );

        Ok(file_path)
    }

    /// Decode an inline base64 payload and save it, sniffing the extension
    pub async fn save_base64(&self, prompt_id: &str, model: &str, b64_data: &str) -> Result<PathBuf> {
        let image_data = base64::decode(b64_data)?;
        let extension = detect_image_format(&image_data)
            .or_else(|| base64::get_format_from_data_url(b64_data).map(normalize_mime_subtype))
            .unwrap_or("png");
        self.save(prompt_id, model, &image_data, extension).await
    }
}

/// Deterministic output filename for one generation
pub fn generate_filename(prompt_id: &str, model: &str, extension: &str) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!(
        "{}_{}_{}.{}",
        sanitize(prompt_id),
        sanitize(model),
        timestamp,
        extension
    )
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn normalize_mime_subtype(subtype: &str) -> &'static str {
    match subtype {
        "jpeg" | "jpg" => "jpg",
        "svg+xml" | "svg" => "svg",
        "webp" => "webp",
        "gif" => "gif",
        _ => "png",
    }
}

/// Pick a file extension from an image URL, defaulting to png
pub fn extension_from_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".svg") {
        "svg"
    } else if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "jpg"
    } else if path.ends_with(".webp") {
        "webp"
    } else {
        "png"
    }
}

/// Detect image format from binary data using magic bytes
pub fn detect_image_format(data: &[u8]) -> Option<&'static str> {
    if data.len() < 8 {
        return None;
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("png");
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpg");
    }

    // GIF: GIF87a or GIF89a
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("gif");
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("webp");
    }

    if data.starts_with(b"<svg") || data.starts_with(b"<?xml") {
        return Some("svg");
    }

    None
}

/// List image files directly inside `dir`, sorted by path
pub async fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
