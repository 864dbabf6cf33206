//! Engine configuration, read from an optional JSON file.
//!
//! Every field has a default, so a file only needs the values it changes and
//! a missing file means all defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::data_structures::geometry::NormalMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub target_fps: u32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Camera speed in world units per second.
    pub move_speed: f32,
    /// Radians of camera turn per pixel of mouse motion.
    pub rotate_sensitivity: f32,
    pub clear_colour: [f64; 4],
    pub normals: NormalMode,
    pub window_title: String,
    pub initial_camera: [f32; 3],
    /// Scene snapshot restored at startup.
    pub scene: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 1000.0,
            move_speed: 10.0,
            rotate_sensitivity: 0.004,
            clear_colour: [0.1, 0.2, 0.3, 1.0],
            normals: NormalMode::default(),
            window_title: "mesh-stage".to_string(),
            initial_camera: [0.0, 1.0, -10.0],
            scene: None,
        }
    }
}

impl EngineConfig {
    /// Reads `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::info!("{} not found, using default configuration", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.target_fps == 0 {
            bail!("target_fps must be positive");
        }
        if !(self.fov_y_degrees > 0.0 && self.fov_y_degrees < 180.0) {
            bail!("fov_y_degrees must be between 0 and 180, got {}", self.fov_y_degrees);
        }
        if !(self.near > 0.0 && self.far > self.near) {
            bail!("clip planes must satisfy 0 < near < far, got {} and {}", self.near, self.far);
        }
        Ok(())
    }
}
