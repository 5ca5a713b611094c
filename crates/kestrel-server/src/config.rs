//! Configuration loading

use anyhow::Result;
use kestrel_common::KestrelConfig;
use std::path::Path;

/// Load configuration from file, falling back to defaults if it doesn't
/// exist.
pub async fn load(path: &str) -> Result<KestrelConfig> {
    KestrelConfig::load(Path::new(path)).await.map_err(|e| anyhow::anyhow!(e))
}
