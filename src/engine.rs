use crate::config::TimingConfig;
use crate::error::PlayerError;
use crate::output::ToneOutput;
use crate::selector::PlayMode;
use crate::settings::SettingsProvider;
use crate::timing::{CancelToken, Clock, Scheduler, SessionOutcome, Timeline};
use crossbeam::channel::{Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub enum PlayerCommand {
    Play { path: PathBuf, mode: PlayMode },
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerUpdate {
    SessionStarted {
        path: PathBuf,
        mode: PlayMode,
        events: usize,
    },
    /// Sent whenever the sounded tone changes and once more when a session ends.
    Status { text: String, sounding: bool },
    SessionEnded { outcome: SessionOutcome },
    Error { message: String },
}

pub struct PlayerHandle {
    pub command_tx: Sender<PlayerCommand>,
    pub update_rx: Receiver<PlayerUpdate>,
    thread: JoinHandle<()>,
}

impl PlayerHandle {
    pub fn play(&self, path: impl Into<PathBuf>, mode: PlayMode) {
        let _ = self.command_tx.send(PlayerCommand::Play {
            path: path.into(),
            mode,
        });
    }

    pub fn stop(&self) {
        let _ = self.command_tx.send(PlayerCommand::Stop);
    }

    /// Stops any running session and waits for the player thread to exit.
    pub fn shutdown(self) {
        let PlayerHandle {
            command_tx, thread, ..
        } = self;
        drop(command_tx);
        let _ = thread.join();
    }
}

/// Everything a session needs besides its timeline.
#[derive(Clone)]
pub struct PlayerContext {
    pub clock: Arc<dyn Clock>,
    pub output: Arc<dyn ToneOutput>,
    pub settings: Arc<dyn SettingsProvider>,
    pub timing: TimingConfig,
}

pub fn spawn_player(context: PlayerContext) -> PlayerHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    let thread = std::thread::spawn(move || {
        player_thread(context, command_rx, update_tx);
    });

    PlayerHandle {
        command_tx,
        update_rx,
        thread,
    }
}

struct Session {
    cancel: CancelToken,
    done: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Session {
    fn is_running(&self) -> bool {
        !self.done.load(Ordering::Acquire)
    }

    fn stop(self) {
        self.cancel.cancel();
        let _ = self.thread.join();
    }
}

fn player_thread(
    context: PlayerContext,
    command_rx: Receiver<PlayerCommand>,
    update_tx: Sender<PlayerUpdate>,
) {
    let mut session: Option<Session> = None;

    loop {
        match command_rx.recv() {
            Ok(PlayerCommand::Play { path, mode }) => {
                if session.as_ref().is_some_and(Session::is_running) {
                    warn!(path = %path.display(), "play requested while a session is running");
                    let _ = update_tx.send(PlayerUpdate::Error {
                        message: PlayerError::SessionActive.to_string(),
                    });
                    continue;
                }
                if let Some(finished) = session.take() {
                    let _ = finished.thread.join();
                }

                match Timeline::load(&path) {
                    Ok(timeline) => {
                        session = Some(start_session(&context, &update_tx, path, mode, timeline));
                    }
                    Err(e) => {
                        error!(error = %e, "cannot start playback");
                        let _ = update_tx.send(PlayerUpdate::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }

            Ok(PlayerCommand::Stop) => {
                if let Some(active) = session.take() {
                    active.stop();
                }
                context.output.silence();
            }

            Err(crossbeam::channel::RecvError) => {
                if let Some(active) = session.take() {
                    active.stop();
                }
                context.output.silence();
                break;
            }
        }
    }
}

fn start_session(
    context: &PlayerContext,
    update_tx: &Sender<PlayerUpdate>,
    path: PathBuf,
    mode: PlayMode,
    timeline: Timeline,
) -> Session {
    let cancel = CancelToken::new();
    let scheduler = Scheduler::new(
        context.clock.clone(),
        context.output.clone(),
        context.settings.clone(),
        update_tx.clone(),
        context.timing.clone(),
        cancel.clone(),
    );

    info!(
        path = %path.display(),
        %mode,
        events = timeline.len(),
        ticks_per_beat = timeline.ticks_per_beat(),
        "starting playback"
    );
    let _ = update_tx.send(PlayerUpdate::SessionStarted {
        path,
        mode,
        events: timeline.len(),
    });

    let done = Arc::new(AtomicBool::new(false));
    let session_done = done.clone();
    let update_tx = update_tx.clone();
    let thread = std::thread::spawn(move || {
        let outcome = scheduler.run(&timeline, mode);
        // Flag first: anyone who sees SessionEnded may start the next session.
        session_done.store(true, Ordering::Release);
        let _ = update_tx.send(PlayerUpdate::SessionEnded { outcome });
    });

    Session {
        cancel,
        done,
        thread,
    }
}
