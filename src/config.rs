use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::camera::Facing;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub display: DisplayConfig,
    pub camera: CameraConfig,
    pub print: PrintConfig,
    pub paths: PathConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraBackendKind {
    Libcamera,
    TestPattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub backend: CameraBackendKind,
    /// Overrides the device-class default when set
    pub default_facing: Option<Facing>,
    /// User-agent style device signal; the host OS is used when unset
    pub user_agent: Option<String>,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub back_camera_index: u32,
    pub front_camera_index: u32,
    pub flip_settle_ms: u64,
    pub preview_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintConfig {
    pub target_mesh: String,
    pub material_slot: String,
    pub clip_name: String,
    pub tick_interval_ms: u64,
    pub fallback_image: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub config_file: PathBuf,
    pub scene_file: Option<PathBuf>,
    pub shutter_sound: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display: DisplayConfig {
                width: 800,
                height: 480,
                fullscreen: true,
            },
            camera: CameraConfig {
                backend: CameraBackendKind::Libcamera,
                default_facing: None,
                user_agent: None,
                width: 800,
                height: 600,
                quality: 85,
                back_camera_index: 0,
                front_camera_index: 1,
                flip_settle_ms: 300,
                preview_dir: std::env::temp_dir(),
            },
            print: PrintConfig {
                target_mesh: "Plane_1".to_string(),
                material_slot: "Image".to_string(),
                clip_name: "PlaneAction".to_string(),
                tick_interval_ms: 16,
                fallback_image: None,
            },
            paths: PathConfig {
                config_file: PathBuf::from("instant_camera.toml"),
                scene_file: None,
                shutter_sound: None,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::default().paths.config_file;
        Self::load_or_create(config_path)
    }

    /// Read `path`, or write the host's preset there when it does not exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();

        if config_path.exists() {
            Self::load_from_file(config_path)
        } else {
            log::info!("Config file not found, creating default configuration");
            let mut default_config = Self::for_host();
            default_config.paths.config_file = config_path.to_path_buf();
            default_config.save()?;
            Ok(default_config)
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| "Failed to parse configuration file")?;

        log::info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_file(&self.paths.config_file)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow::anyhow!("Invalid display dimensions"));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow::anyhow!(
                "Invalid camera resolution: {}x{}",
                self.camera.width,
                self.camera.height
            ));
        }

        if self.camera.quality > 100 {
            return Err(anyhow::anyhow!("Invalid JPEG quality: {}", self.camera.quality));
        }

        if self.camera.back_camera_index == self.camera.front_camera_index {
            return Err(anyhow::anyhow!(
                "Front and back cameras share index {}",
                self.camera.back_camera_index
            ));
        }

        // Below ~1 fps the eject looks like a slideshow
        if self.print.tick_interval_ms == 0 || self.print.tick_interval_ms > 1000 {
            return Err(anyhow::anyhow!("Invalid tick interval: {}ms", self.print.tick_interval_ms));
        }

        for (field, value) in [
            ("target_mesh", &self.print.target_mesh),
            ("material_slot", &self.print.material_slot),
            ("clip_name", &self.print.clip_name),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow::anyhow!("print.{} must not be empty", field));
            }
        }

        Ok(())
    }
}

// Environment-specific configuration presets
impl Config {
    /// Pi builds get the kiosk preset, anything else the desktop one
    pub fn for_host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Self::raspberry_pi_7inch()
        } else {
            Self::development_desktop()
        }
    }

    pub fn raspberry_pi_7inch() -> Self {
        Config {
            display: DisplayConfig {
                width: 800,
                height: 480,
                fullscreen: true,
            },
            ..Default::default()
        }
    }

    pub fn development_desktop() -> Self {
        Config {
            display: DisplayConfig {
                width: 1024,
                height: 768,
                fullscreen: false,
            },
            camera: CameraConfig {
                backend: CameraBackendKind::TestPattern,
                flip_settle_ms: 100,
                ..Config::default().camera
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.print.material_slot, "Image");
        assert_eq!(config.camera.flip_settle_ms, 300);
    }

    #[test]
    fn test_missing_file_creates_host_preset() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("instant_camera.toml");

        let created = Config::load_or_create(&config_path).unwrap();
        assert!(config_path.exists());
        assert_eq!(created.paths.config_file, config_path);
        assert_eq!(created.display.fullscreen, Config::for_host().display.fullscreen);

        // Second start reads what the first one wrote
        let mut edited = created.clone();
        edited.print.tick_interval_ms = 33;
        edited.save().unwrap();
        let reloaded = Config::load_or_create(&config_path).unwrap();
        assert_eq!(reloaded.print.tick_interval_ms, 33);
    }

    #[test]
    fn test_default_config_file_name() {
        assert_eq!(Config::default().paths.config_file, PathBuf::from("instant_camera.toml"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.print.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        config.print.tick_interval_ms = 16;
        config.camera.front_camera_index = config.camera.back_camera_index;
        assert!(config.validate().is_err());

        config.camera.front_camera_index = 1;
        config.print.material_slot = "  ".to_string();
        assert!(config.validate().is_err());

        config.print.material_slot = "Image".to_string();
        config.display.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let mut original_config = Config::development_desktop();
        original_config.camera.default_facing = Some(Facing::Front);
        original_config.paths.shutter_sound = Some(PathBuf::from("sounds/shutter.wav"));
        original_config.save_to_file(&config_path).unwrap();

        let loaded_config = Config::load_from_file(&config_path).unwrap();

        assert_eq!(original_config.display.width, loaded_config.display.width);
        assert_eq!(loaded_config.camera.backend, CameraBackendKind::TestPattern);
        assert_eq!(loaded_config.camera.default_facing, Some(Facing::Front));
        assert_eq!(loaded_config.paths.shutter_sound, original_config.paths.shutter_sound);
        assert!(loaded_config.paths.scene_file.is_none());
    }

    #[test]
    fn test_facing_serialized_lowercase() {
        let mut config = Config::default();
        config.camera.default_facing = Some(Facing::Back);
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("default_facing = \"back\""));
        assert!(text.contains("backend = \"libcamera\""));
    }

    #[test]
    fn test_preset_configs() {
        assert!(Config::raspberry_pi_7inch().validate().is_ok());
        assert!(Config::development_desktop().validate().is_ok());
        assert!(Config::for_host().validate().is_ok());
        assert_eq!(Config::development_desktop().camera.backend, CameraBackendKind::TestPattern);
    }
}
