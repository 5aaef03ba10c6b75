/// MIDI channel index reserved for percussion. Nothing on it is pitched.
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Tempo in effect before the first tempo meta event (120 bpm).
pub const DEFAULT_TEMPO_US_PER_BEAT: u32 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub tick: u64,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPayload {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8 },
    TempoChange { us_per_beat: u32 },
}

impl EventPayload {
    /// A note-on with zero velocity is a release.
    pub fn is_release(&self) -> bool {
        matches!(
            self,
            EventPayload::NoteOff { .. } | EventPayload::NoteOn { velocity: 0, .. }
        )
    }
}
