use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tokio::fs;

/// Decodes `secret` into `destination`. Returns `false` when there is no secret.
pub async fn install_cookies(secret: &Path, destination: &Path) -> Result<bool> {
    if !secret.exists() {
        tracing::warn!("Cookie secret not found at {}; extractor runs without cookies", secret.display());
        return Ok(false);
    }

    let encoded = fs::read_to_string(secret).await?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .with_context(|| format!("Cookie secret at {} is not valid base64", secret.display()))?;

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(destination, decoded).await?;
    tracing::info!("cookies written to {} from secret file", destination.display());
    Ok(true)
}
