use std::path::{Path, PathBuf};
use std::time::Duration;

use image::Rgba;

use crate::components::tools::{DEFAULT_BRUSH_SIZE, MASK_COLOR, MAX_BRUSH_SIZE, MIN_BRUSH_SIZE};

/// Persistent user settings, stored as `key=value` lines.
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    /// Maximum number of undo steps
    pub max_undo_steps: usize,
    /// History memory cap in megabytes (0 = unlimited)
    pub history_memory_mb: usize,
    /// Brush diameter in surface pixels
    pub brush_size: u32,
    /// Mask overlay color
    pub brush_color: Rgba<u8>,
    /// Maximum pan distance in display pixels per axis
    pub max_pan_offset: f32,
    /// Quiet period before a resize burst triggers a stroke replay
    pub resize_debounce_ms: u64,
    /// Longest edge of loaded photos; larger inputs are downscaled
    pub max_image_dimension: u32,
    /// Write the session to the autosave directory after every stroke
    pub autosave: bool,
    /// Autosave directory override; `None` uses the platform data directory
    pub autosave_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            max_undo_steps: 50,
            history_memory_mb: 100,
            brush_size: DEFAULT_BRUSH_SIZE,
            brush_color: MASK_COLOR,
            max_pan_offset: crate::canvas::DEFAULT_MAX_PAN_OFFSET,
            resize_debounce_ms: 250,
            max_image_dimension: 2000,
            autosave: true,
            autosave_dir: None,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/restorefe/restorefe_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\RestoreFE\restorefe_settings.cfg
    /// On macOS:   ~/Library/Application Support/RestoreFE/restorefe_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("restorefe");
            return Some(config_dir.join("restorefe_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("RestoreFE").join("restorefe_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("RestoreFE")
                    .join("restorefe_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("restorefe_settings.cfg")))
        }
    }

    /// Directory autosaved sessions are written to.
    pub fn resolved_autosave_dir(&self) -> PathBuf {
        self.autosave_dir.clone().unwrap_or_else(crate::io::autosave_dir)
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }

    /// History memory cap in bytes, `None` when unlimited.
    pub fn history_memory_bytes(&self) -> Option<usize> {
        (self.history_memory_mb > 0).then(|| self.history_memory_mb * 1024 * 1024)
    }

    fn color_to_str(c: Rgba<u8>) -> String {
        format!("{},{},{},{}", c.0[0], c.0[1], c.0[2], c.0[3])
    }

    /// Parse "r,g,b,a"
    fn str_to_color(s: &str) -> Option<Rgba<u8>> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() == 4 {
            let r = parts[0].trim().parse::<u8>().ok()?;
            let g = parts[1].trim().parse::<u8>().ok()?;
            let b = parts[2].trim().parse::<u8>().ok()?;
            let a = parts[3].trim().parse::<u8>().ok()?;
            Some(Rgba([r, g, b, a]))
        } else {
            None
        }
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "max_undo_steps={}\n\
             history_memory_mb={}\n\
             brush_size={}\n\
             brush_color={}\n\
             max_pan_offset={}\n\
             resize_debounce_ms={}\n\
             max_image_dimension={}\n\
             autosave={}\n\
             autosave_dir={}\n",
            self.max_undo_steps,
            self.history_memory_mb,
            self.brush_size,
            Self::color_to_str(self.brush_color),
            self.max_pan_offset,
            self.resize_debounce_ms,
            self.max_image_dimension,
            self.autosave,
            self.autosave_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        )
    }

    /// Parse settings text.  Unknown keys and malformed values keep defaults.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "max_undo_steps" => {
                    s.max_undo_steps = val.parse::<usize>().map(|v| v.max(1)).unwrap_or(50);
                }
                "history_memory_mb" => {
                    s.history_memory_mb = val.parse().unwrap_or(100);
                }
                "brush_size" => {
                    s.brush_size = val
                        .parse::<u32>()
                        .map(|v| v.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE))
                        .unwrap_or(DEFAULT_BRUSH_SIZE);
                }
                "brush_color" => {
                    if let Some(c) = Self::str_to_color(val) {
                        s.brush_color = c;
                    }
                }
                "max_pan_offset" => {
                    s.max_pan_offset = val
                        .parse::<f32>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .map(f32::abs)
                        .unwrap_or(crate::canvas::DEFAULT_MAX_PAN_OFFSET);
                }
                "resize_debounce_ms" => {
                    s.resize_debounce_ms = val.parse().unwrap_or(250);
                }
                "max_image_dimension" => {
                    s.max_image_dimension = val.parse().unwrap_or(2000);
                }
                "autosave" => {
                    s.autosave = val == "true";
                }
                "autosave_dir" => {
                    s.autosave_dir = (!val.is_empty()).then(|| PathBuf::from(val));
                }
                _ => {}
            }
        }
        s
    }

    /// Save settings to disk
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        self.save_to(&path);
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, self.to_config_string()) {
            crate::log_warn!("Could not write settings {}: {}", path.display(), e);
        }
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else { return Self::default() };
        Self::from_config_str(&content)
    }
}
