//! Display settings
//!
//! Persisted as XML in the user's config directory. Holds the pool size,
//! presentation options and the render parameters handed to the renderer.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pool::MAX_BUFFERS;

/// RGBA color with components in 0..1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ColorRgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Tone mapping curve requested from the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ToneMapping {
    #[default]
    Auto,
    Clip,
    Hable,
    Mobius,
    Reinhard,
    Bt2390,
}

/// Scaling filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ScalerKind {
    Nearest,
    #[default]
    Bilinear,
}

/// User color adjustments, applied after decoding to RGB
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorAdjust {
    /// Added to RGB, -1..1
    #[serde(default)]
    pub brightness: f32,
    /// Multiplier around mid grey
    #[serde(default = "default_one")]
    pub contrast: f32,
    /// Multiplier on chroma
    #[serde(default = "default_one")]
    pub saturation: f32,
    /// Exponent applied to the result
    #[serde(default = "default_one")]
    pub gamma: f32,
    /// Hue rotation in radians
    #[serde(default)]
    pub hue: f32,
}

impl Default for ColorAdjust {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: 1.0,
            saturation: 1.0,
            gamma: 1.0,
            hue: 0.0,
        }
    }
}

impl ColorAdjust {
    /// Whether every adjustment is neutral
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// Parameters passed through to the renderer untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RenderParams {
    #[serde(default)]
    pub upscaler: ScalerKind,
    #[serde(default)]
    pub downscaler: ScalerKind,
    #[serde(default)]
    pub deband: bool,
    #[serde(default)]
    pub sigmoidize: bool,
    #[serde(default)]
    pub dither: bool,
    #[serde(rename = "toneMapping", default)]
    pub tone_mapping: ToneMapping,
    #[serde(rename = "peakDetect", default)]
    pub peak_detect: bool,
    #[serde(rename = "colorAdjust", default)]
    pub color: ColorAdjust,
}

/// Video output settings stored in the config directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "ImmersiveVoutSettings")]
pub struct DisplaySettings {
    /// Pictures requested for the decoder pool
    #[serde(rename = "poolSize", default = "default_pool_size")]
    pub pool_size: usize,

    /// Present in sync with the display refresh (Fifo)
    #[serde(rename = "vsyncEnabled", default = "default_true")]
    pub vsync: bool,

    #[serde(rename = "windowWidth", default = "default_window_width")]
    pub window_width: u32,

    #[serde(rename = "windowHeight", default = "default_window_height")]
    pub window_height: u32,

    /// Fill for the area outside the picture
    #[serde(rename = "background", default = "default_background")]
    pub background: ColorRgba,

    /// Fill drawn when a frame could not be uploaded or rendered
    #[serde(rename = "failColor", default = "default_fail_color")]
    pub fail_color: ColorRgba,

    #[serde(rename = "render", default)]
    pub render: RenderParams,
}

fn default_pool_size() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_one() -> f32 {
    1.0
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

fn default_background() -> ColorRgba {
    ColorRgba::new(0.0, 0.0, 0.0, 0.0)
}

fn default_fail_color() -> ColorRgba {
    ColorRgba::new(1.0, 0.0, 0.0, 1.0)
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            vsync: true,
            window_width: default_window_width(),
            window_height: default_window_height(),
            background: default_background(),
            fail_color: default_fail_color(),
            render: RenderParams::default(),
        }
    }
}

impl DisplaySettings {
    /// Keep values inside what the pipeline accepts
    pub fn sanitize(&mut self) {
        self.pool_size = self.pool_size.clamp(1, MAX_BUFFERS);
        self.window_width = self.window_width.max(1);
        self.window_height = self.window_height.max(1);
    }

    /// Default settings file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("ImmersiveVout");
            p.push("display.xml");
            p
        })
    }

    /// Load settings from an XML file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(SettingsError::Io)?;
        Self::from_xml(&contents)
    }

    /// Parse settings from XML text
    pub fn from_xml(xml: &str) -> Result<Self, SettingsError> {
        let mut settings: Self = from_str(xml).map_err(SettingsError::XmlParse)?;
        settings.sanitize();
        Ok(settings)
    }

    /// Serialize to XML text, declaration included
    pub fn to_xml(&self) -> Result<String, SettingsError> {
        let xml = to_string(self).map_err(SettingsError::XmlWrite)?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml))
    }

    /// Save settings to an XML file, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SettingsError::Io)?;
        }
        fs::write(path, self.to_xml()?).map_err(SettingsError::Io)?;
        Ok(())
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to load display settings from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), SettingsError> {
        let Some(path) = Self::default_path() else {
            return Err(SettingsError::NoConfigDir);
        };
        self.save_to_file(&path)
    }
}

/// Settings-related errors
#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    XmlParse(quick_xml::DeError),
    XmlWrite(quick_xml::SeError),
    NoConfigDir,
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::XmlParse(e) => write!(f, "XML parse error: {}", e),
            SettingsError::XmlWrite(e) => write!(f, "XML write error: {}", e),
            SettingsError::NoConfigDir => write!(f, "Could not find config directory"),
        }
    }
}

impl std::error::Error for SettingsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = DisplaySettings::default();
        assert_eq!(settings.pool_size, 8);
        assert!(settings.vsync);
        assert_eq!(settings.fail_color.to_array(), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(settings.background.to_array(), [0.0; 4]);
        assert!(settings.render.color.is_identity());
    }

    #[test]
    fn test_xml_round_trip() {
        let mut settings = DisplaySettings::default();
        settings.pool_size = 12;
        settings.vsync = false;
        settings.background = ColorRgba::new(0.1, 0.2, 0.3, 1.0);
        settings.render.deband = true;
        settings.render.tone_mapping = ToneMapping::Hable;
        settings.render.color.saturation = 1.5;

        let xml = settings.to_xml().unwrap();
        assert!(xml.starts_with("<?xml"));
        let loaded = DisplaySettings::from_xml(&xml).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let loaded = DisplaySettings::from_xml("<ImmersiveVoutSettings><poolSize>3</poolSize></ImmersiveVoutSettings>")
            .unwrap();
        assert_eq!(loaded.pool_size, 3);
        assert_eq!(loaded.window_width, 1280);
        assert_eq!(loaded.fail_color, default_fail_color());
    }

    #[test]
    fn test_pool_size_sanitized() {
        let loaded =
            DisplaySettings::from_xml("<ImmersiveVoutSettings><poolSize>1000</poolSize></ImmersiveVoutSettings>")
                .unwrap();
        assert_eq!(loaded.pool_size, MAX_BUFFERS);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("immersive-vout-test-{}", std::process::id()));
        let path = dir.join("display.xml");
        let mut settings = DisplaySettings::default();
        settings.window_width = 1920;
        settings.save_to_file(&path).unwrap();
        let loaded = DisplaySettings::load_from_file(&path).unwrap();
        assert_eq!(loaded.window_width, 1920);
        let _ = fs::remove_dir_all(&dir);
    }
}
