//! Configuration inputs the core consumes. No config UI — that is an external collaborator.

use serde::Deserialize;
use std::fs;
use std::path::Path;

fn default_workers() -> usize {
    4
}

fn default_strategy() -> Vec<String> {
    vec!["max".into(), "3000".into(), "1740".into()]
}

fn default_quality() -> String {
    "default".into()
}

fn default_tile_ram_gb() -> f64 {
    2.0
}

fn default_retention_days() -> u32 {
    30
}

fn default_temp_cleanup_days() -> u32 {
    7
}

/// `system.download_workers`, `images.download_strategy`,
/// `images.iiif_quality`, `images.tile_stitch_max_ram_gb`,
/// `defaults.auto_generate_pdf`, `storage.exports_retention_days`,
/// `housekeeping.temp_cleanup_days`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub download_workers: usize,
    pub download_strategy: Vec<String>,
    pub iiif_quality: String,
    pub tile_stitch_max_ram_gb: f64,
    pub auto_generate_pdf: bool,
    pub exports_retention_days: u32,
    pub temp_cleanup_days: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            download_workers: default_workers(),
            download_strategy: default_strategy(),
            iiif_quality: default_quality(),
            tile_stitch_max_ram_gb: default_tile_ram_gb(),
            auto_generate_pdf: false,
            exports_retention_days: default_retention_days(),
            temp_cleanup_days: default_temp_cleanup_days(),
        }
    }
}

impl VaultConfig {
    /// Loads from `path` if it exists and parses, else falls back to
    /// defaults. A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let config: VaultConfig = toml::from_str(&raw)?;
        Ok(config)
    }

    pub fn tile_stitch_max_ram_bytes(&self) -> u64 {
        (self.tile_stitch_max_ram_gb.clamp(1.0, 64.0) * 1024.0 * 1024.0 * 1024.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = VaultConfig::default();
        assert_eq!(config.download_workers, 4);
        assert_eq!(config.download_strategy, vec!["max", "3000", "1740"]);
        assert_eq!(config.iiif_quality, "default");
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = VaultConfig::load(Some(Path::new("/nonexistent/vault.toml"))).unwrap();
        assert_eq!(config.download_workers, 4);
    }

    #[test]
    fn ram_cap_is_clamped_to_spec_range() {
        let mut config = VaultConfig::default();
        config.tile_stitch_max_ram_gb = 0.1;
        assert_eq!(config.tile_stitch_max_ram_bytes(), 1024 * 1024 * 1024);
        config.tile_stitch_max_ram_gb = 128.0;
        assert_eq!(config.tile_stitch_max_ram_bytes(), 64 * 1024 * 1024 * 1024);
    }
}
