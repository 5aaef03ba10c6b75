use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::Sender;
use tracing::{debug, error, info};

use super::{Clock, Timeline};
use crate::config::TimingConfig;
use crate::engine::PlayerUpdate;
use crate::error::PlayerError;
use crate::events::{DEFAULT_TEMPO_US_PER_BEAT, EventPayload};
use crate::output::{ToneOutput, note_to_frequency, note_to_name, transpose};
use crate::selector::{ActiveNotes, NoteSelector, PlayMode};
use crate::settings::SettingsProvider;

/// Cooperative stop flag shared between a session and whoever controls it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Finished,
    Cancelled,
    Errored(String),
}

impl SessionOutcome {
    pub fn status_text(&self) -> String {
        match self {
            SessionOutcome::Finished => "DONE".to_string(),
            SessionOutcome::Cancelled => "STOPPED".to_string(),
            SessionOutcome::Errored(message) => format!("Error: {message}"),
        }
    }
}

/// Real-time wall-clock length of `delta_ticks` at `us_per_beat`, played
/// `speed` times faster than written.
pub fn wait_duration(
    timeline: &Timeline,
    delta_ticks: u64,
    us_per_beat: u32,
    speed: f64,
) -> Result<Duration, PlayerError> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(PlayerError::InvalidSettings(format!(
            "speed multiplier must be positive, got {speed}"
        )));
    }
    let seconds = timeline.ticks_to_seconds(delta_ticks, us_per_beat) / speed;
    Duration::try_from_secs_f64(seconds).map_err(|e| PlayerError::InvalidSettings(e.to_string()))
}

struct SessionState {
    current_tick: u64,
    tempo_us_per_beat: u32,
    active: ActiveNotes,
    selector: NoteSelector,
    last_hz: Option<u32>,
}

impl SessionState {
    fn new(mode: PlayMode) -> Self {
        Self {
            current_tick: 0,
            tempo_us_per_beat: DEFAULT_TEMPO_US_PER_BEAT,
            active: ActiveNotes::new(),
            selector: NoteSelector::new(mode),
            last_hz: None,
        }
    }

    fn apply(&mut self, payload: EventPayload) {
        match payload {
            EventPayload::TempoChange { us_per_beat } => {
                debug!(tick = self.current_tick, us_per_beat, "tempo change");
                self.tempo_us_per_beat = us_per_beat;
            }
            EventPayload::NoteOn { pitch, velocity } if velocity > 0 => self.active.press(pitch),
            EventPayload::NoteOn { pitch, .. } | EventPayload::NoteOff { pitch } => {
                self.active.release(pitch);
                self.selector.note_released();
            }
        }
    }
}

/// Replays one timeline against the wall clock through a monophonic output.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    output: Arc<dyn ToneOutput>,
    settings: Arc<dyn SettingsProvider>,
    updates: Sender<PlayerUpdate>,
    timing: TimingConfig,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        output: Arc<dyn ToneOutput>,
        settings: Arc<dyn SettingsProvider>,
        updates: Sender<PlayerUpdate>,
        timing: TimingConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            clock,
            output,
            settings,
            updates,
            timing,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Plays the whole timeline. Whatever happens, the device is silenced and
    /// the final status is reported before this returns.
    pub fn run(&self, timeline: &Timeline, mode: PlayMode) -> SessionOutcome {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.play(timeline, mode))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => SessionOutcome::Errored(e.to_string()),
            Err(payload) => SessionOutcome::Errored(panic_message(payload.as_ref())),
        };

        self.output.silence();
        match &outcome {
            SessionOutcome::Errored(message) => error!(%message, "playback aborted"),
            other => info!(outcome = ?other, "playback ended"),
        }
        self.notify(outcome.status_text(), false);

        outcome
    }

    fn play(&self, timeline: &Timeline, mode: PlayMode) -> Result<SessionOutcome, PlayerError> {
        let mut state = SessionState::new(mode);
        let mut deadline = self.clock.now();

        for event in timeline.events() {
            if self.cancel.is_cancelled() {
                return Ok(SessionOutcome::Cancelled);
            }
            let settings = self.settings.snapshot();

            if event.tick > state.current_tick {
                // Chain deadlines so rounding and loop overhead never accumulate.
                deadline += wait_duration(
                    timeline,
                    event.tick - state.current_tick,
                    state.tempo_us_per_beat,
                    settings.speed_multiplier,
                )?;
                if !self.hold_until(deadline, &mut state) {
                    return Ok(SessionOutcome::Cancelled);
                }
                state.current_tick = event.tick;
            }

            state.apply(event.payload);
        }

        Ok(SessionOutcome::Finished)
    }

    /// Keeps re-telling the device what to sound until `deadline`. Returns
    /// `false` if cancelled first.
    fn hold_until(&self, deadline: Duration, state: &mut SessionState) -> bool {
        loop {
            let now = self.clock.now();
            if now >= deadline {
                return true;
            }
            if self.cancel.is_cancelled() {
                return false;
            }

            let settings = self.settings.snapshot();
            let pitch = state
                .selector
                .select(&state.active, now, settings.arpeggio_interval());
            self.sound(pitch, settings.transpose, state);

            let pause = if state.selector.is_cycling(&state.active) {
                self.timing.arpeggio_poll_interval()
            } else {
                self.timing.poll_interval()
            };
            self.clock.sleep(pause.min(deadline - now));
        }
    }

    fn sound(&self, pitch: Option<u8>, semitones: i8, state: &mut SessionState) {
        let note = pitch.map_or(0, |p| transpose(p, semitones));
        let hz = note_to_frequency(note);
        self.output.send(hz);

        if state.last_hz != Some(hz) {
            state.last_hz = Some(hz);
            if hz > 0 {
                self.notify(format!("{} | {hz} Hz", note_to_name(note)), true);
            } else {
                self.notify("...".to_string(), false);
            }
        }
    }

    fn notify(&self, text: String, sounding: bool) {
        let _ = self.updates.send(PlayerUpdate::Status { text, sounding });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("internal fault: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("internal fault: {s}")
    } else {
        "internal fault".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TimedEvent;
    use crate::output::{Buzzer, LineTransport, written_tones};
    use crate::settings::{PlaybackSettings, SharedSettings};
    use crate::timing::clock::tests::ManualClock;
    use crossbeam::channel::{Receiver, unbounded};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    type TestBuzzer = Buzzer<LineTransport<Vec<u8>>>;

    /// Records every send with the virtual time it happened at.
    struct Recorder {
        clock: Arc<ManualClock>,
        buzzer: TestBuzzer,
        log: Mutex<Vec<(Duration, u32)>>,
        on_send: Box<dyn Fn(usize, u32) + Send + Sync>,
    }

    impl Recorder {
        fn new(clock: Arc<ManualClock>) -> Self {
            Self::with_hook(clock, |_, _| {})
        }

        fn with_hook(
            clock: Arc<ManualClock>,
            on_send: impl Fn(usize, u32) + Send + Sync + 'static,
        ) -> Self {
            Self {
                clock,
                buzzer: Buzzer::new(LineTransport::new(Vec::new())),
                log: Mutex::new(Vec::new()),
                on_send: Box::new(on_send),
            }
        }

        fn written(&self) -> Vec<u32> {
            self.buzzer.with_transport(|t| written_tones(t.get_ref()))
        }

        /// Virtual time of the first send of `hz`.
        fn first_time_of(&self, hz: u32) -> Option<Duration> {
            self.log
                .lock()
                .iter()
                .find(|(_, sent)| *sent == hz)
                .map(|(at, _)| *at)
        }
    }

    impl ToneOutput for Recorder {
        fn send(&self, hz: u32) {
            let count = {
                let mut log = self.log.lock();
                log.push((self.clock.now(), hz));
                log.len()
            };
            self.buzzer.send(hz);
            (self.on_send)(count, hz);
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        output: Arc<Recorder>,
        updates: Receiver<PlayerUpdate>,
        scheduler: Scheduler,
    }

    fn harness(
        settings: Arc<dyn SettingsProvider>,
        make_output: impl FnOnce(Arc<ManualClock>) -> Recorder,
    ) -> Harness {
        let clock = Arc::new(ManualClock::default());
        let output = Arc::new(make_output(clock.clone()));
        let (tx, rx) = unbounded();
        let scheduler = Scheduler::new(
            clock.clone(),
            output.clone(),
            settings,
            tx,
            TimingConfig::default(),
            CancelToken::new(),
        );

        Harness {
            clock,
            output,
            updates: rx,
            scheduler,
        }
    }

    fn settings(speed: f64, semitones: i8, arpeggio: f64) -> Arc<dyn SettingsProvider> {
        Arc::new(PlaybackSettings {
            speed_multiplier: speed,
            transpose: semitones,
            arpeggio_interval_seconds: arpeggio,
        })
    }

    fn on(tick: u64, pitch: u8) -> TimedEvent {
        TimedEvent {
            tick,
            payload: EventPayload::NoteOn {
                pitch,
                velocity: 100,
            },
        }
    }

    fn off(tick: u64, pitch: u8) -> TimedEvent {
        TimedEvent {
            tick,
            payload: EventPayload::NoteOff { pitch },
        }
    }

    fn tempo(tick: u64, us_per_beat: u32) -> TimedEvent {
        TimedEvent {
            tick,
            payload: EventPayload::TempoChange { us_per_beat },
        }
    }

    fn statuses(rx: &Receiver<PlayerUpdate>) -> Vec<(String, bool)> {
        rx.try_iter()
            .filter_map(|update| match update {
                PlayerUpdate::Status { text, sounding } => Some((text, sounding)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn one_beat_at_default_tempo_waits_half_a_second() {
        let timeline = Timeline::from_events(480, vec![]).unwrap();

        let wait = wait_duration(&timeline, 480, DEFAULT_TEMPO_US_PER_BEAT, 1.0).unwrap();
        assert_eq!(wait, Duration::from_millis(500));

        let faster = wait_duration(&timeline, 480, DEFAULT_TEMPO_US_PER_BEAT, 2.0).unwrap();
        assert_eq!(faster, Duration::from_millis(250));

        let slower_tempo = wait_duration(&timeline, 480, 1_000_000, 1.0).unwrap();
        assert_eq!(slower_tempo, wait * 2);
    }

    #[test]
    fn non_positive_speed_is_rejected() {
        let timeline = Timeline::from_events(480, vec![]).unwrap();

        assert!(wait_duration(&timeline, 1, 500_000, 0.0).is_err());
        assert!(wait_duration(&timeline, 1, 500_000, -1.0).is_err());
        assert!(wait_duration(&timeline, 1, 500_000, f64::NAN).is_err());
    }

    #[test]
    fn solo_holds_note_for_one_beat_then_silences() {
        let h = harness(settings(1.0, 0, 0.04), Recorder::new);
        let timeline = Timeline::from_events(480, vec![on(0, 60), off(480, 60)]).unwrap();

        let outcome = h.scheduler.run(&timeline, PlayMode::Solo);

        assert_eq!(outcome, SessionOutcome::Finished);
        assert_eq!(h.output.written(), vec![262, 0]);
        assert_eq!(h.output.first_time_of(262), Some(Duration::ZERO));
        assert_eq!(h.output.first_time_of(0), Some(Duration::from_millis(500)));
        assert_eq!(h.clock.now(), Duration::from_millis(500));
        assert_eq!(
            statuses(&h.updates),
            vec![
                ("C4 | 262 Hz".to_string(), true),
                ("DONE".to_string(), false)
            ]
        );
    }

    #[test]
    fn solo_sounds_latest_note_of_a_chord() {
        let h = harness(settings(1.0, 0, 0.04), Recorder::new);
        let timeline = Timeline::from_events(
            480,
            vec![on(0, 60), on(0, 67), on(0, 64), off(240, 64), off(480, 60), off(480, 67)],
        )
        .unwrap();

        h.scheduler.run(&timeline, PlayMode::Solo);

        // E4, then G4 once E4 is released.
        assert_eq!(h.output.written(), vec![330, 392, 0]);
        assert_eq!(h.output.first_time_of(392), Some(Duration::from_millis(250)));
    }

    #[test]
    fn chiptune_alternates_chord_notes() {
        let h = harness(settings(1.0, 0, 0.05), Recorder::new);
        let timeline =
            Timeline::from_events(480, vec![on(0, 64), on(0, 60), off(960, 60), off(960, 64)])
                .unwrap();

        let outcome = h.scheduler.run(&timeline, PlayMode::Chiptune);

        assert_eq!(outcome, SessionOutcome::Finished);
        let mut expected: Vec<u32> = [262, 330].repeat(10);
        expected.push(0);
        assert_eq!(h.output.written(), expected);
        assert_eq!(h.clock.now(), Duration::from_secs(1));
    }

    #[test]
    fn tempo_change_doubles_later_waits() {
        let h = harness(settings(1.0, 0, 0.04), Recorder::new);
        let timeline = Timeline::from_events(
            480,
            vec![on(0, 69), tempo(480, 1_000_000), off(960, 69)],
        )
        .unwrap();

        h.scheduler.run(&timeline, PlayMode::Solo);

        assert_eq!(h.output.written(), vec![440, 0]);
        assert_eq!(h.output.first_time_of(0), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn speed_multiplier_shortens_waits() {
        let h = harness(settings(2.0, 0, 0.04), Recorder::new);
        let timeline = Timeline::from_events(480, vec![on(0, 60), off(480, 60)]).unwrap();

        h.scheduler.run(&timeline, PlayMode::Solo);

        assert_eq!(h.output.first_time_of(0), Some(Duration::from_millis(250)));
    }

    #[test]
    fn rests_are_rendered_as_silence() {
        let h = harness(settings(1.0, 0, 0.04), Recorder::new);
        let timeline =
            Timeline::from_events(480, vec![on(240, 60), off(480, 60), on(720, 62), off(960, 62)])
                .unwrap();

        h.scheduler.run(&timeline, PlayMode::Solo);

        assert_eq!(h.output.written(), vec![0, 262, 0, 294, 0]);
        let texts: Vec<String> = statuses(&h.updates).into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            texts,
            vec!["...", "C4 | 262 Hz", "...", "D4 | 294 Hz", "DONE"]
        );
    }

    #[test]
    fn transpose_clamps_at_both_ends() {
        let h = harness(settings(1.0, 12, 0.04), Recorder::new);
        let timeline = Timeline::from_events(480, vec![on(0, 125), off(480, 125)]).unwrap();
        h.scheduler.run(&timeline, PlayMode::Solo);
        assert_eq!(h.output.written(), vec![note_to_frequency(127), 0]);

        let h = harness(settings(1.0, -12, 0.04), Recorder::new);
        let timeline = Timeline::from_events(480, vec![on(0, 2), off(480, 2)]).unwrap();
        h.scheduler.run(&timeline, PlayMode::Solo);
        assert_eq!(h.output.written(), vec![0]);
    }

    #[test]
    fn transpose_change_applies_mid_note() {
        let shared = SharedSettings::new(PlaybackSettings::default());
        let writer = shared.clone();
        let h = harness(Arc::new(shared), move |clock| {
            Recorder::with_hook(clock, move |count, _| {
                if count == 1 {
                    writer.update(|s| s.nudge_transpose(12));
                }
            })
        });
        let timeline = Timeline::from_events(480, vec![on(0, 60), off(480, 60)]).unwrap();

        h.scheduler.run(&timeline, PlayMode::Solo);

        assert_eq!(h.output.written(), vec![262, 523, 0]);
    }

    #[test]
    fn cancellation_sends_only_the_final_silence() {
        let sends_after_cancel = Arc::new(AtomicUsize::new(0));
        let cancel = CancelToken::new();

        let counter = sends_after_cancel.clone();
        let trigger = cancel.clone();
        let h = harness(settings(1.0, 0, 0.04), move |clock| {
            Recorder::with_hook(clock, move |count, _| {
                if trigger.is_cancelled() {
                    counter.fetch_add(1, Ordering::SeqCst);
                } else if count == 5 {
                    trigger.cancel();
                }
            })
        });
        let scheduler = Scheduler::new(
            h.clock.clone(),
            h.output.clone(),
            settings(1.0, 0, 0.04),
            crossbeam::channel::unbounded().0,
            TimingConfig::default(),
            cancel,
        );
        let timeline = Timeline::from_events(480, vec![on(0, 60), off(48_000, 60)]).unwrap();

        let outcome = scheduler.run(&timeline, PlayMode::Solo);

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(sends_after_cancel.load(Ordering::SeqCst), 1);
        assert_eq!(h.output.buzzer.last_sent(), Some(0));
        assert!(h.clock.now() <= TimingConfig::default().poll_interval() * 5);
    }

    #[test]
    fn cancelled_before_start_plays_nothing() {
        let h = harness(settings(1.0, 0, 0.04), Recorder::new);
        h.scheduler.cancel_token().cancel();
        let timeline = Timeline::from_events(480, vec![on(0, 60), off(480, 60)]).unwrap();

        let outcome = h.scheduler.run(&timeline, PlayMode::Chiptune);

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(h.output.written(), vec![0]);
        assert_eq!(statuses(&h.updates), vec![("STOPPED".to_string(), false)]);
    }

    #[test]
    fn invalid_speed_errors_and_silences() {
        let h = harness(settings(0.0, 0, 0.04), Recorder::new);
        let timeline = Timeline::from_events(480, vec![on(0, 60), off(480, 60)]).unwrap();

        let outcome = h.scheduler.run(&timeline, PlayMode::Solo);

        assert!(matches!(outcome, SessionOutcome::Errored(ref m) if m.contains("speed")));
        assert_eq!(h.output.written(), vec![0]);
        let last = statuses(&h.updates).pop().unwrap();
        assert!(last.0.starts_with("Error: "));
        assert!(!last.1);
    }

    struct BrokenSettings;

    impl SettingsProvider for BrokenSettings {
        fn snapshot(&self) -> PlaybackSettings {
            panic!("settings backend vanished")
        }
    }

    #[test]
    fn internal_fault_is_contained() {
        let h = harness(Arc::new(BrokenSettings), Recorder::new);
        let timeline = Timeline::from_events(480, vec![on(0, 60), off(480, 60)]).unwrap();

        let outcome = h.scheduler.run(&timeline, PlayMode::Solo);

        assert_eq!(
            outcome,
            SessionOutcome::Errored("internal fault: settings backend vanished".to_string())
        );
        assert_eq!(h.output.buzzer.last_sent(), Some(0));
    }

    /// A device that never accepts data: every write waits out its timeout and fails.
    struct StalledTransport {
        timeout: Duration,
    }

    impl crate::output::ToneTransport for StalledTransport {
        fn write_tone(&mut self, _hz: u32) -> std::io::Result<()> {
            std::thread::sleep(self.timeout);
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))
        }
    }

    #[test]
    fn stalled_device_does_not_block_cancellation() {
        let timing = TimingConfig::default();
        let output = Arc::new(Buzzer::new(StalledTransport {
            timeout: timing.write_timeout(),
        }));
        let scheduler = Scheduler::new(
            Arc::new(crate::timing::SystemClock::new()),
            output,
            settings(1.0, 0, 0.04),
            crossbeam::channel::unbounded().0,
            timing.clone(),
            CancelToken::new(),
        );
        let cancel = scheduler.cancel_token();
        let timeline = Timeline::from_events(480, vec![on(0, 60), off(48_000, 60)]).unwrap();

        let (done_tx, done_rx) = crossbeam::channel::bounded(1);
        std::thread::spawn(move || {
            let _ = done_tx.send(scheduler.run(&timeline, PlayMode::Solo));
        });

        std::thread::sleep(Duration::from_millis(200));
        let cancelled_at = std::time::Instant::now();
        cancel.cancel();

        let outcome = done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(outcome, SessionOutcome::Cancelled);
        // One write in flight plus the final silence.
        assert!(cancelled_at.elapsed() < timing.write_timeout() * 4);
    }

    #[test]
    fn empty_timeline_finishes_silently() {
        let h = harness(settings(1.0, 0, 0.04), Recorder::new);
        let timeline = Timeline::from_events(480, vec![]).unwrap();

        assert_eq!(
            h.scheduler.run(&timeline, PlayMode::Solo),
            SessionOutcome::Finished
        );
        assert_eq!(h.output.written(), vec![0]);
    }
}
