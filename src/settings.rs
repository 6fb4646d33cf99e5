//! Media settings
//!
//! Player and exporter defaults, stored as XML next to the other Immersive
//! Server configuration files.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Playback defaults applied on load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// FFmpeg decoder threads (0 = let FFmpeg decide)
    #[serde(rename = "decodeThreads")]
    pub decode_threads: usize,

    /// Media time buffered ahead of the clock, in milliseconds
    #[serde(rename = "lookAheadMs")]
    pub look_ahead_ms: u32,

    /// Restart from the beginning at end of stream
    #[serde(rename = "loop")]
    pub loop_playback: bool,

    /// Initial playback rate
    #[serde(rename = "speed")]
    pub speed: f64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            decode_threads: 8,
            look_ahead_ms: 100,
            loop_playback: true,
            speed: 1.0,
        }
    }
}

/// Exporter encoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// FFmpeg encoder name
    #[serde(rename = "codec")]
    pub codec: String,

    /// Encoder profile option (ProRes: proxy, lt, standard, hq, 4444, 4444xq)
    #[serde(rename = "profile", skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Encoder pixel format
    #[serde(rename = "pixelFormat")]
    pub pixel_format: String,

    /// Target bit rate in bits per second (codec default when unset)
    #[serde(rename = "bitRate", skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<usize>,

    /// Flip frames vertically before encoding
    #[serde(rename = "verticalFlip")]
    pub vflip: bool,

    /// Log a warning when a frame takes longer than one frame interval to encode
    #[serde(rename = "warnOnSlowEncode")]
    pub warn_on_slow_encode: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            codec: "prores_ks".to_string(),
            profile: Some("4444".to_string()),
            pixel_format: "yuv444p10le".to_string(),
            bit_rate: None,
            vflip: false,
            warn_on_slow_encode: true,
        }
    }
}

/// Root settings document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "MediaSettings", default)]
pub struct MediaSettings {
    #[serde(rename = "player")]
    pub player: PlayerSettings,

    #[serde(rename = "export")]
    pub export: ExportSettings,
}

impl MediaSettings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("ImmersiveServer");
            p.push("media.xml");
            p
        })
    }

    pub fn from_xml_str(xml: &str) -> Result<Self, SettingsError> {
        let mut settings: Self = from_str(xml).map_err(SettingsError::XmlParse)?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn to_xml_string(&self) -> Result<String, SettingsError> {
        let xml = to_string(self).map_err(SettingsError::XmlWrite)?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml))
    }

    /// Load settings from an XML file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(SettingsError::Io)?;
        Self::from_xml_str(&contents)
    }

    /// Save settings to an XML file, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SettingsError::Io)?;
        }
        let xml = self.to_xml_string()?;
        fs::write(path, xml).map_err(SettingsError::Io)?;
        Ok(())
    }

    /// Load from the config directory, falling back to defaults
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
                tracing::warn!("Ignoring unreadable media settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save to the config directory
    pub fn save(&self) -> Result<(), SettingsError> {
        let Some(path) = Self::default_path() else {
            return Err(SettingsError::NoConfigDir);
        };
        self.save_to_file(&path)
    }

    fn sanitize(&mut self) {
        let speed = self.player.speed;
        self.player.speed = if speed.is_finite() { speed.max(0.0) } else { 1.0 };
    }
}

/// Settings persistence errors
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
