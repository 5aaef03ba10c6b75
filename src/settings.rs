use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::PlayerError;

pub const SPEED_RANGE: (f64, f64) = (0.5, 2.0);
pub const SPEED_STEP: f64 = 0.1;
pub const TRANSPOSE_RANGE: (i8, i8) = (-12, 12);
pub const ARPEGGIO_RANGE: (f64, f64) = (0.010, 0.100);
pub const ARPEGGIO_STEP: f64 = 0.005;

/// Knobs the listener may turn while a song is playing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub speed_multiplier: f64,
    pub transpose: i8,
    pub arpeggio_interval_seconds: f64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            transpose: 0,
            arpeggio_interval_seconds: 0.040,
        }
    }
}

impl PlaybackSettings {
    /// Pulls every field into the range the controls offer. Non-finite
    /// values fall back to the defaults.
    pub fn clamped(self) -> Self {
        let defaults = Self::default();
        let speed = if self.speed_multiplier.is_finite() {
            self.speed_multiplier
        } else {
            defaults.speed_multiplier
        };
        let arpeggio = if self.arpeggio_interval_seconds.is_finite() {
            self.arpeggio_interval_seconds
        } else {
            defaults.arpeggio_interval_seconds
        };

        Self {
            speed_multiplier: speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1),
            transpose: self.transpose.clamp(TRANSPOSE_RANGE.0, TRANSPOSE_RANGE.1),
            arpeggio_interval_seconds: arpeggio.clamp(ARPEGGIO_RANGE.0, ARPEGGIO_RANGE.1),
        }
    }

    /// Negative or unrepresentable intervals fall back to the default.
    pub fn arpeggio_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.arpeggio_interval_seconds).unwrap_or_else(|_| {
            Duration::from_secs_f64(Self::default().arpeggio_interval_seconds)
        })
    }

    pub fn nudge_speed(self, steps: i32) -> Self {
        // Round to the step grid so repeated nudges don't drift.
        let speed = ((self.speed_multiplier / SPEED_STEP).round() + steps as f64) * SPEED_STEP;
        Self {
            speed_multiplier: speed,
            ..self
        }
        .clamped()
    }

    pub fn nudge_transpose(self, semitones: i8) -> Self {
        Self {
            transpose: self.transpose.saturating_add(semitones),
            ..self
        }
        .clamped()
    }

    pub fn nudge_arpeggio(self, steps: i32) -> Self {
        let interval =
            ((self.arpeggio_interval_seconds / ARPEGGIO_STEP).round() + steps as f64) * ARPEGGIO_STEP;
        Self {
            arpeggio_interval_seconds: interval,
            ..self
        }
        .clamped()
    }
}

impl std::fmt::Display for PlaybackSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "speed {:.1}x | transpose {:+} | arp {:.0} ms",
            self.speed_multiplier,
            self.transpose,
            self.arpeggio_interval_seconds * 1000.0
        )
    }
}

/// Read side of the live settings, sampled by the scheduler on every pass.
pub trait SettingsProvider: Send + Sync {
    fn snapshot(&self) -> PlaybackSettings;
}

impl SettingsProvider for PlaybackSettings {
    fn snapshot(&self) -> PlaybackSettings {
        *self
    }
}

/// Settings shared between the controls and a running session. Readers get
/// an immutable snapshot; writers swap in a whole new value.
#[derive(Clone)]
pub struct SharedSettings {
    inner: Arc<ArcSwap<PlaybackSettings>>,
}

impl SharedSettings {
    pub fn new(initial: PlaybackSettings) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    pub fn store(&self, settings: PlaybackSettings) {
        self.inner.store(Arc::new(settings));
    }

    pub fn update(&self, mut f: impl FnMut(PlaybackSettings) -> PlaybackSettings) -> PlaybackSettings {
        self.inner.rcu(|current| Arc::new(f(**current)));
        self.snapshot()
    }
}

impl SettingsProvider for SharedSettings {
    fn snapshot(&self) -> PlaybackSettings {
        **self.inner.load()
    }
}

/// Reloads the `settings` block of the config file into [`SharedSettings`]
/// whenever the file changes. Dropping it stops watching.
pub struct SettingsWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl SettingsWatcher {
    pub fn spawn(config_path: &Path, settings: SharedSettings) -> Result<Self, PlayerError> {
        let path = config_path.to_path_buf();
        let reload_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match AppConfig::load(&reload_path) {
                        Ok(config) => {
                            let reloaded = config.settings.clamped();
                            settings.store(reloaded);
                            info!(%reloaded, "settings reloaded");
                        }
                        Err(e) => warn!(error = %e, "ignoring config change"),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "config watch error"),
            },
            Config::default(),
        )
        .map_err(|e| PlayerError::Config(format!("cannot watch {}: {e}", path.display())))?;

        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| PlayerError::Config(format!("cannot watch {}: {e}", path.display())))?;

        Ok(Self {
            _watcher: watcher,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
