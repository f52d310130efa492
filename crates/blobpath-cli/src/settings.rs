use std::path::Path;

use anyhow::Context;
use blobpath_core::{DataPathConfig, VolumeConfig};
use serde::{Deserialize, Serialize};

/// Contents of the `--config` file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_path: DataPathConfig,
    pub volume: VolumeConfig,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.data_path.validate()?;
        Ok(settings)
    }
}
