use anyhow::{bail, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use log::info;
use std::path::Path;

use crate::core::io::Storage;

/// A still image sent alongside a prompt, already base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub media_type: String,
    pub data: String,
}

impl Frame {
    pub fn from_bytes(media_type: &str, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            data: STANDARD.encode(bytes),
        }
    }
}

fn media_type_for(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Evenly spaced picks over `n` items, at most `max` of them.
pub fn sample_indices(n: usize, max: usize) -> Vec<usize> {
    if max == 0 {
        return Vec::new();
    }
    let step = (n / max).max(1);
    (0..n).step_by(step).take(max).collect()
}

/// Loads pre-extracted video frames from `dir`, sampled down to `max_images`.
pub async fn load_frames(storage: &dyn Storage, dir: &str, max_images: usize) -> Result<Vec<Frame>> {
    let images: Vec<(String, &'static str)> = storage
        .list(dir)
        .await?
        .into_iter()
        .filter_map(|p| media_type_for(&p).map(|m| (p, m)))
        .collect();

    if images.is_empty() {
        bail!("No frame images (jpg, png, webp) found in {}", dir);
    }

    let picks = sample_indices(images.len(), max_images);
    info!("Using {} of {} frames from {}", picks.len(), images.len(), dir);

    let mut frames = Vec::with_capacity(picks.len());
    for i in picks {
        let (path, media_type) = &images[i];
        let bytes = storage.read(path).await?;
        frames.push(Frame::from_bytes(media_type, &bytes));
    }
    Ok(frames)
}
