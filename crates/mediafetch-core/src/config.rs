//! Settings file loading

use crate::error::FetchError;
use mediafetch_types::Settings;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

/// Load settings from a JSON file; a missing file yields the defaults
pub async fn load_settings(path: &Path) -> Result<Settings, FetchError> {
    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return Ok(Settings::default());
    }

    let content = fs::read_to_string(path).await?;
    let settings: Settings = serde_json::from_str(&content)?;
    info!("Loaded settings from {:?}", path);
    Ok(settings)
}
