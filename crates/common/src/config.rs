//! Player configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields the stock handheld setup: 960x544 maximum, RGBA output, two
//! decoder output buffers, manual start, pull-thread audio at 48 kHz stereo.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::frame::{Geometry, PixelLayout};

/// Minimum alignment the GPU requires for mapped blocks (256 KiB).
pub const DEFAULT_GPU_ALIGNMENT: usize = 0x40000;

/// How decoded audio reaches the output device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioMode {
    /// A dedicated thread polls the decoder and pushes PCM to a port.
    #[default]
    PullThread,
    /// The output device's clock calls back for each buffer it needs.
    PullCallback,
    /// No audio output.
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub mode: AudioMode,
    /// Sample frames per output call.
    pub buffer_frames: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mode: AudioMode::PullThread,
            buffer_frames: 1024,
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Largest frame width the conversion stage accepts.
    pub max_width: u32,
    /// Largest frame height the conversion stage accepts.
    pub max_height: u32,
    pub output_layout: PixelLayout,
    /// Number of video output buffers the decoder rotates through.
    pub output_buffers: u32,
    /// Scheduling priority hint passed through to the decoder.
    pub base_priority: u32,
    /// Let the decoder start immediately instead of waiting for the
    /// ready event and explicit stream enablement.
    pub auto_start: bool,
    pub gpu_alignment: usize,
    /// Microseconds the video pump sleeps when no frame is ready.
    /// Zero yields the time slice instead.
    pub pump_idle_us: u64,
    pub audio: AudioConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_width: 960,
            max_height: 544,
            output_layout: PixelLayout::Rgba8888,
            output_buffers: 2,
            base_priority: 0xA0,
            auto_start: false,
            gpu_alignment: DEFAULT_GPU_ALIGNMENT,
            pump_idle_us: 500,
            audio: AudioConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Load a config from a JSON file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        debug!(path = %path.display(), ?config, "Loaded player config");
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "maximum geometry {}x{} must be non-zero",
                self.max_width, self.max_height
            )));
        }
        if self.output_buffers == 0 {
            return Err(ConfigError::Invalid(
                "output_buffers must be at least 1".to_string(),
            ));
        }
        if !self.gpu_alignment.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "gpu_alignment {} is not a power of two",
                self.gpu_alignment
            )));
        }
        if self.audio.mode != AudioMode::Disabled
            && (self.audio.buffer_frames == 0
                || self.audio.sample_rate == 0
                || self.audio.channels == 0)
        {
            return Err(ConfigError::Invalid(
                "audio buffer_frames, sample_rate and channels must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn max_geometry(&self) -> Geometry {
        Geometry::new(self.max_width, self.max_height)
    }

    pub fn pump_idle(&self) -> Duration {
        Duration::from_micros(self.pump_idle_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_geometry(), Geometry::new(960, 544));
        assert_eq!(config.gpu_alignment, 0x40000);
        assert_eq!(config.audio.buffer_frames, 1024);
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config = PlayerConfig::from_json("{}").unwrap();
        assert_eq!(config, PlayerConfig::default());
    }

    #[test]
    fn partial_json_overrides_fields() {
        let config = PlayerConfig::from_json(
            r#"{ "output_layout": "Rgb24", "auto_start": true, "audio": { "mode": "Disabled" } }"#,
        )
        .unwrap();
        assert_eq!(config.output_layout, PixelLayout::Rgb24);
        assert!(config.auto_start);
        assert_eq!(config.audio.mode, AudioMode::Disabled);
        assert_eq!(config.audio.sample_rate, 48_000);
    }

    #[test]
    fn rejects_bad_alignment() {
        let err = PlayerConfig::from_json(r#"{ "gpu_alignment": 3000 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_geometry() {
        let config = PlayerConfig {
            max_width: 0,
            ..PlayerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_width": 1280, "max_height": 720 }}"#).unwrap();
        let config = PlayerConfig::load(file.path()).unwrap();
        assert_eq!(config.max_geometry(), Geometry::new(1280, 720));
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = PlayerConfig::load(Path::new("/nonexistent/avbridge.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("avbridge.json"));
    }
}
