use std::path::Path;
use std::time::Duration;

use blobpath_rpc::ChannelConfig;
use blobpath_types::{Volume, VolumeId};
use serde::{Deserialize, Serialize};

use crate::error::{DataPathError, DataPathResult};

/// How the segment updates of one transaction are issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    /// Await each update before issuing the next.
    #[default]
    Sequential,
    /// Issue updates together, bounded by `apply_concurrency`.
    Concurrent,
}

/// Configuration for a [`DataPath`](crate::DataPath).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPathConfig {
    /// Deadline for every backing-store call.
    pub request_timeout_ms: u64,
    /// Period of the background timeout sweep.
    pub sweep_interval_ms: u64,
    /// Maximum number of reads and writes running at once.
    pub max_inflight: usize,
    pub apply_mode: ApplyMode,
    /// Upper bound on in-flight updates in [`ApplyMode::Concurrent`].
    pub apply_concurrency: usize,
    /// Extra abort attempts after the first one fails.
    pub abort_retries: u32,
    pub abort_backoff_ms: u64,
}

impl Default for DataPathConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            sweep_interval_ms: 100,
            max_inflight: 64,
            apply_mode: ApplyMode::Sequential,
            apply_concurrency: 8,
            abort_retries: 2,
            abort_backoff_ms: 50,
        }
    }
}

impl DataPathConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> DataPathResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| DataPathError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> DataPathResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> DataPathResult<()> {
        if self.max_inflight == 0 {
            return Err(DataPathError::Config("max_inflight must be at least 1".into()));
        }
        if self.apply_concurrency == 0 {
            return Err(DataPathError::Config(
                "apply_concurrency must be at least 1".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(DataPathError::Config(
                "request_timeout_ms must be at least 1".into(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(DataPathError::Config(
                "sweep_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn abort_backoff(&self) -> Duration {
        Duration::from_millis(self.abort_backoff_ms)
    }

    /// Timing for a channel client carrying this data path's calls.
    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            request_timeout: self.request_timeout(),
            sweep_interval: self.sweep_interval(),
        }
    }
}

/// Serializable description of a [`Volume`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub domain: String,
    pub name: String,
    pub object_size_bytes: u32,
    pub capacity_bytes: u64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            domain: "default".into(),
            name: "vol0".into(),
            object_size_bytes: 1 << 20,
            capacity_bytes: 1 << 40,
        }
    }
}

impl VolumeConfig {
    /// Validate and build the volume.
    pub fn to_volume(&self) -> DataPathResult<Volume> {
        let id = VolumeId::new(self.domain.clone(), self.name.clone())?;
        Ok(Volume::new(id, self.object_size_bytes, self.capacity_bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    #[test]
    fn default_config() {
        let c = DataPathConfig::default();
        assert_eq!(c.request_timeout(), Duration::from_secs(30));
        assert_eq!(c.sweep_interval(), Duration::from_millis(100));
        assert_eq!(c.max_inflight, 64);
        assert_eq!(c.apply_mode, ApplyMode::Sequential);
        assert_eq!(c.apply_concurrency, 8);
        assert_eq!(c.abort_retries, 2);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = DataPathConfig::from_toml_str(
            "max_inflight = 4\napply_mode = \"concurrent\"\n",
        )
        .unwrap();
        assert_eq!(c.max_inflight, 4);
        assert_eq!(c.apply_mode, ApplyMode::Concurrent);
        assert_eq!(c.request_timeout_ms, 30_000);
    }

    #[test]
    fn zero_limits_rejected() {
        let err = DataPathConfig::from_toml_str("max_inflight = 0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(DataPathConfig::from_toml_str("apply_concurrency = 0").is_err());
    }

    #[test]
    fn unknown_apply_mode_rejected() {
        assert!(DataPathConfig::from_toml_str("apply_mode = \"sideways\"").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "request_timeout_ms = 250").unwrap();
        writeln!(file, "abort_retries = 0").unwrap();
        let c = DataPathConfig::from_file(file.path()).unwrap();
        assert_eq!(c.request_timeout(), Duration::from_millis(250));
        assert_eq!(c.abort_retries, 0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DataPathConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, DataPathError::Io(_)));
    }

    #[test]
    fn volume_config_builds_volume() {
        let v = VolumeConfig {
            object_size_bytes: 4096,
            capacity_bytes: 4096 * 16,
            ..Default::default()
        }
        .to_volume()
        .unwrap();
        assert_eq!(v.object_size(), 4096);
        assert_eq!(v.object_capacity(), 16);
    }

    #[test]
    fn volume_config_rejects_bad_object_size() {
        let err = VolumeConfig {
            object_size_bytes: 3000,
            ..Default::default()
        }
        .to_volume()
        .unwrap_err();
        assert!(matches!(err, DataPathError::Type(_)));
    }
}
