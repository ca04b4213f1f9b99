//! Pipeline configuration: layered TOML/environment sources with typed
//! defaults (spec &6).
//!
//! The core itself holds no on-disk state; this crate only parses the
//! options the core's init path needs into a typed [`PipelineConfig`].

#![warn(future_incompatible, nonstandard_style, rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

mod errors;

use config::{ConfigError, FileFormat};
use serde::{Deserialize, Serialize};

pub use errors::{Error, Result};

/// The default filename for pipeline configuration files.
pub static DEFAULT_FILENAME: &str = "capd.toml";

/// Controls `resize_factor`: `out_w = in_w / {1, 2, 4}` (spec &4.5, &6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Full,
    Half,
    Quarter,
}

impl Resolution {
    #[must_use]
    pub fn divisor(self) -> u32 {
        match self {
            Self::Full => 1,
            Self::Half => 2,
            Self::Quarter => 4,
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::Full
    }
}

/// Selects the capture backend; `auto` prefers `buffer_queue` when
/// available, falling back to `direct_capture` then `fallback` during
/// init only (spec &6, &7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    Auto,
    BufferQueue,
    DirectCapture,
    Fallback,
}

impl Default for CaptureMode {
    fn default() -> Self {
        Self::Auto
    }
}

/// Configuration options recognized at pipeline init (spec &6), all with
/// defaults so a caller may omit the whole section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub resolution: Resolution,
    pub target_fps: u32,
    pub enable_gpu_preprocess: bool,
    pub custom_width: u32,
    pub custom_height: u32,
    pub mode: CaptureMode,
    pub fence_timeout_ms: u64,
    pub output_buffer_count: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::Full,
            target_fps: 30,
            enable_gpu_preprocess: true,
            custom_width: 0,
            custom_height: 0,
            mode: CaptureMode::Auto,
            fence_timeout_ms: 80,
            output_buffer_count: 2,
        }
    }
}

impl PipelineConfig {
    /// Clamps caller-supplied values to the invariants the rest of the
    /// core relies on: `output_buffer_count >= 2` (spec &3), and a zero
    /// `custom_width`/`custom_height` means "use physical" rather than
    /// zero (spec &6).
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.output_buffer_count = self.output_buffer_count.max(2);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) config: config::Config,
}

impl Config {
    /// Builds a configuration from a TOML string. Useful for tests.
    pub fn from_toml(toml: &str) -> Self {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .expect("failed to build the configuration");
        Self { config }
    }

    /// Loads the configuration from all its various sources, in order,
    /// later sources overriding earlier ones:
    ///
    /// - `/etc/capd/capd.toml` on UNIX.
    /// - Any `capd.toml` in the current binary's directory or ancestors.
    /// - Any `capd.toml` in the current working directory or ancestors.
    /// - `$XDG_CONFIG_HOME/capd/capd.toml` / `$HOME/.config/capd/capd.toml`.
    /// - The file named by `CAPD_CONFIG`, if set.
    /// - Environment variables prefixed `CAPD_`.
    ///
    /// # Errors
    /// Returns an error if any present source fails to parse.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if cfg!(unix) {
            builder = builder.add_source(
                config::File::with_name(&format!("/etc/capd/{DEFAULT_FILENAME}"))
                    .required(false)
                    .format(FileFormat::Toml),
            );
        }

        let mut known_path = None;
        if let Ok(exe) = std::env::current_exe() {
            if let Some(parent) = exe.parent() {
                for dir in parent.ancestors() {
                    let path = dir.join(DEFAULT_FILENAME);
                    if std::fs::metadata(&path).is_ok() {
                        builder = builder.add_source(config::File::from(path.clone()).format(FileFormat::Toml));
                        known_path = Some(path);
                        break;
                    }
                }
            }
        }

        if let Ok(cwd) = std::env::current_dir() {
            for dir in cwd.ancestors() {
                let path = dir.join(DEFAULT_FILENAME);
                if std::fs::metadata(&path).is_ok() {
                    if known_path.as_ref() == Some(&path) {
                        break;
                    }
                    builder = builder.add_source(config::File::from(path).format(FileFormat::Toml));
                    break;
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("capd").join(DEFAULT_FILENAME);
            builder = builder.add_source(config::File::from(path).required(false).format(FileFormat::Toml));
        }

        if let Some(path) = std::env::var_os("CAPD_CONFIG") {
            builder = builder.add_source(config::File::from(std::path::PathBuf::from(path)).format(FileFormat::Toml));
        }

        builder = builder.add_source(config::Environment::with_prefix("CAPD"));

        Ok(Self { config: builder.build()? })
    }

    /// Reads the `pipeline` table into a [`PipelineConfig`], filling in
    /// defaults for anything absent.
    pub fn pipeline(&self) -> Result<PipelineConfig> {
        match self.config.get::<PipelineConfig>("pipeline") {
            Ok(cfg) => Ok(cfg.normalized()),
            Err(ConfigError::NotFound(_)) => Ok(PipelineConfig::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.resolution, Resolution::Full);
        assert_eq!(cfg.output_buffer_count, 2);
        assert_eq!(cfg.fence_timeout_ms, 80);
        assert!(cfg.enable_gpu_preprocess);
        assert_eq!(cfg.mode, CaptureMode::Auto);
    }

    #[test]
    fn normalized_clamps_output_buffer_count() {
        let cfg = PipelineConfig { output_buffer_count: 1, ..PipelineConfig::default() };
        assert_eq!(cfg.normalized().output_buffer_count, 2);
    }

    #[test]
    fn resolution_divisor_matches_resize_factor() {
        assert_eq!(Resolution::Full.divisor(), 1);
        assert_eq!(Resolution::Half.divisor(), 2);
        assert_eq!(Resolution::Quarter.divisor(), 4);
    }

    #[test]
    fn from_toml_overrides_defaults() {
        let config = Config::from_toml(
            r#"
            [pipeline]
            resolution = "half"
            target_fps = 60
            "#,
        );
        let cfg = config.pipeline().unwrap();
        assert_eq!(cfg.resolution, Resolution::Half);
        assert_eq!(cfg.target_fps, 60);
        assert_eq!(cfg.output_buffer_count, 2);
    }
}
