use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::{cursor, execute, style, terminal};

use crate::engine::{PlayerHandle, PlayerUpdate};
use crate::error::PlayerError;
use crate::selector::PlayMode;
use crate::settings::{PlaybackSettings, SettingsProvider, SharedSettings};

const REFRESH: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Speed(i32),
    Transpose(i8),
    Arpeggio(i32),
    ToggleMode,
    TogglePlayback,
    Quit,
}

impl Control {
    pub fn from_key(key: &KeyEvent) -> Option<Self> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return matches!(key.code, KeyCode::Char('c')).then_some(Control::Quit);
        }
        match key.code {
            KeyCode::Char('+') | KeyCode::Char('=') => Some(Control::Speed(1)),
            KeyCode::Char('-') => Some(Control::Speed(-1)),
            KeyCode::Up => Some(Control::Transpose(1)),
            KeyCode::Down => Some(Control::Transpose(-1)),
            KeyCode::Char(']') => Some(Control::Arpeggio(1)),
            KeyCode::Char('[') => Some(Control::Arpeggio(-1)),
            KeyCode::Char('m') => Some(Control::ToggleMode),
            KeyCode::Char(' ') => Some(Control::TogglePlayback),
            KeyCode::Char('q') | KeyCode::Esc => Some(Control::Quit),
            _ => None,
        }
    }

    /// New settings after this control; `None` if it isn't a settings knob.
    pub fn adjust(self, settings: PlaybackSettings) -> Option<PlaybackSettings> {
        match self {
            Control::Speed(steps) => Some(settings.nudge_speed(steps)),
            Control::Transpose(semitones) => Some(settings.nudge_transpose(semitones)),
            Control::Arpeggio(steps) => Some(settings.nudge_arpeggio(steps)),
            _ => None,
        }
    }
}

struct RawMode;

impl RawMode {
    fn enable() -> Result<Self, PlayerError> {
        terminal::enable_raw_mode().map_err(PlayerError::Terminal)?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Terminal front panel: plays `song` and maps keys to the live settings
/// until the user quits.
pub fn run(
    player: &PlayerHandle,
    settings: &SharedSettings,
    song: &Path,
    mut mode: PlayMode,
) -> Result<(), PlayerError> {
    let _raw = RawMode::enable()?;
    let mut out = io::stdout();
    let mut status = String::from("READY");
    let mut playing = false;

    print_help(&mut out).map_err(PlayerError::Terminal)?;
    player.play(song, mode);

    loop {
        while let Ok(update) = player.update_rx.try_recv() {
            match update {
                PlayerUpdate::SessionStarted { .. } => playing = true,
                PlayerUpdate::Status { text, .. } => status = text,
                PlayerUpdate::SessionEnded { .. } => playing = false,
                PlayerUpdate::Error { message } => status = format!("Error: {message}"),
            }
        }
        draw(&mut out, &status, mode, &settings.snapshot()).map_err(PlayerError::Terminal)?;

        if !event::poll(REFRESH).map_err(PlayerError::Terminal)? {
            continue;
        }
        let Event::Key(key) = event::read().map_err(PlayerError::Terminal)? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match Control::from_key(&key) {
            Some(Control::Quit) => break,
            Some(Control::ToggleMode) => mode = mode.toggled(),
            Some(Control::TogglePlayback) if playing => player.stop(),
            Some(Control::TogglePlayback) => player.play(song, mode),
            Some(control) => {
                settings.update(|s| control.adjust(s).unwrap_or(s));
            }
            None => {}
        }
    }

    execute!(out, style::Print("\r\n")).map_err(PlayerError::Terminal)
}

fn print_help(out: &mut impl Write) -> io::Result<()> {
    execute!(
        out,
        style::Print("+/- speed | up/down transpose | [/] arpeggio | m mode | space stop/play | q quit\r\n")
    )
}

fn draw(
    out: &mut impl Write,
    status: &str,
    mode: PlayMode,
    settings: &PlaybackSettings,
) -> io::Result<()> {
    execute!(
        out,
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine),
        style::Print(format!("[{mode}] {status} | {settings}")),
    )
}
