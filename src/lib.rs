//! Plays standard MIDI files on a single-tone buzzer driven over a
//! line-oriented serial link.

pub mod config;
pub mod controls;
pub mod engine;
pub mod error;
pub mod events;
pub mod output;
pub mod selector;
pub mod settings;
pub mod timing;

pub use config::{AppConfig, TimingConfig};
pub use engine::{PlayerCommand, PlayerContext, PlayerHandle, PlayerUpdate, spawn_player};
pub use error::PlayerError;
pub use events::{EventPayload, TimedEvent};
pub use output::{Buzzer, LineTransport, ToneOutput, note_to_frequency, note_to_name};
pub use selector::{ActiveNotes, NoteSelector, PlayMode};
pub use settings::{PlaybackSettings, SettingsProvider, SettingsWatcher, SharedSettings};
pub use timing::{CancelToken, Clock, Scheduler, SessionOutcome, SystemClock, Timeline};
