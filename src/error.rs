use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("cannot read MIDI file {path}: {reason}")]
    MediaFormat { path: PathBuf, reason: String },

    #[error("tone device write failed: {0}")]
    Transport(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid playback settings: {0}")]
    InvalidSettings(String),

    #[error("a playback session is already running")]
    SessionActive,

    #[error("terminal error: {0}")]
    Terminal(#[source] std::io::Error),
}

impl PlayerError {
    pub(crate) fn media(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PlayerError::MediaFormat {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
