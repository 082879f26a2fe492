// config.rs — 运行时配置
//
// Settings live in an optional JSON file, looked up in this order:
// - Env: PANORAMA_CONFIG=<path>
// - <exe_dir>/panorama.json
// - ./panorama.json  (dev working dir)
// Missing file -> built-in defaults. Every field is optional.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PanoramaError, Result};

pub const CONFIG_ENV: &str = "PANORAMA_CONFIG";
pub const CONFIG_FILE: &str = "panorama.json";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Input gains for the interactive camera.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Degrees per pixel of cursor motion.
    pub drag_sensitivity: f32,
    /// Degrees of fov per scroll line.
    pub scroll_step: f32,
    /// Degrees per frame while W/A/S/D is held.
    pub key_step: f32,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            drag_sensitivity: 0.2,
            scroll_step: 4.0,
            key_step: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub output_dir: PathBuf,
    /// Run on a worker thread instead of blocking the render loop.
    pub background: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            output_dir: PathBuf::from("panoAnimator"),
            background: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub window: WindowSettings,
    pub vsync: bool,
    pub controls: ControlSettings,
    pub export: ExportSettings,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            window: WindowSettings::default(),
            vsync: true,
            controls: ControlSettings::default(),
            export: ExportSettings::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ViewerConfig =
            serde_json::from_str(text).map_err(|e| PanoramaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PanoramaError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Load from the first config file found; defaults when there is none.
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Some(path) => {
                log::info!("loading config from {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.controls;
        if !(c.drag_sensitivity.is_finite() && c.drag_sensitivity > 0.0) {
            return Err(PanoramaError::Config(
                "controls.drag_sensitivity must be positive".into(),
            ));
        }
        if !(c.scroll_step.is_finite() && c.scroll_step > 0.0) {
            return Err(PanoramaError::Config("controls.scroll_step must be positive".into()));
        }
        if !(c.key_step.is_finite() && c.key_step >= 0.0) {
            return Err(PanoramaError::Config("controls.key_step must not be negative".into()));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(PanoramaError::Config("window size must be non-zero".into()));
        }
        let e = &self.export;
        if e.fps == 0 {
            return Err(PanoramaError::Config("export.fps must be at least 1".into()));
        }
        if e.width == 0 || e.height == 0 {
            return Err(PanoramaError::Config("export size must be non-zero".into()));
        }
        Ok(())
    }
}

fn find_config_file() -> Option<PathBuf> {
    if let Ok(v) = std::env::var(CONFIG_ENV) {
        if !v.trim().is_empty() {
            return Some(PathBuf::from(v));
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let p = dir.join(CONFIG_FILE);
            if p.exists() {
                return Some(p);
            }
        }
    }

    let p = PathBuf::from(CONFIG_FILE);
    if p.exists() {
        return Some(p);
    }

    None
}
