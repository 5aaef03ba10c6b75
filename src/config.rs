use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PlayerError;
use crate::selector::PlayMode;
use crate::settings::PlaybackSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait-loop yield while a note is held or the device rests.
    pub poll_interval_ms: u64,
    /// Wait-loop yield while arpeggiating a chord.
    pub arpeggio_poll_interval_ms: u64,
    /// The board resets when the port opens; give it time before writing.
    pub connect_settle_ms: u64,
    /// Longest a single tone write may block before it is dropped.
    pub write_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2,
            arpeggio_poll_interval_ms: 1,
            connect_settle_ms: 2000,
            write_timeout_ms: 50,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn arpeggio_poll_interval(&self) -> Duration {
        Duration::from_millis(self.arpeggio_poll_interval_ms.max(1))
    }

    pub fn connect_settle(&self) -> Duration {
        Duration::from_millis(self.connect_settle_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: PathBuf,
    pub baud_rate: u32,
    pub mode: PlayMode,
    pub settings: PlaybackSettings,
    pub timing: TimingConfig,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyUSB0"),
            baud_rate: 115_200,
            mode: PlayMode::Solo,
            settings: PlaybackSettings::default(),
            timing: TimingConfig::default(),
            log_filter: "buzzline=info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn save(&self, path: &Path) -> Result<(), PlayerError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| PlayerError::Config(e.to_string()))?;
        fs::write(path, ron_string)
            .map_err(|e| PlayerError::Config(format!("{}: {e}", path.display())))?;

        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, PlayerError> {
        let ron_string = fs::read_to_string(path)
            .map_err(|e| PlayerError::Config(format!("{}: {e}", path.display())))?;
        let mut config: AppConfig = ron::from_str(&ron_string)
            .map_err(|e| PlayerError::Config(format!("{}: {e}", path.display())))?;
        config.settings = config.settings.clamped();

        Ok(config)
    }

    /// A missing file means defaults; an unreadable one is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, PlayerError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
