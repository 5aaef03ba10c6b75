use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use crate::error::PlayerError;
use crate::events::{EventPayload, PERCUSSION_CHANNEL, TimedEvent};

pub const US_PER_SECOND: f64 = 1_000_000.0;

/// Every pitched note and tempo event of a file, merged across tracks and
/// ordered by absolute tick.
#[derive(Debug, Clone)]
pub struct Timeline {
    events: Vec<TimedEvent>,
    ticks_per_beat: u16,
}

impl Timeline {
    pub fn load(path: &Path) -> Result<Self, PlayerError> {
        let content = std::fs::read(path).map_err(|e| PlayerError::media(path, e))?;
        let smf = Smf::parse(&content).map_err(|e| PlayerError::media(path, e))?;
        Self::from_smf(&smf).map_err(|reason| PlayerError::media(path, reason))
    }

    pub fn from_smf(smf: &Smf<'_>) -> Result<Self, String> {
        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(tpb) => tpb.as_int(),
            Timing::Timecode(..) => return Err("SMPTE timecode division is not supported".into()),
        };

        let mut events = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                if let Some(payload) = payload_of(&event.kind) {
                    events.push(TimedEvent { tick, payload });
                }
            }
        }

        Self::from_events(ticks_per_beat, events)
    }

    /// Builds a timeline from events in any order. Events sharing a tick keep
    /// their relative order.
    pub fn from_events(ticks_per_beat: u16, mut events: Vec<TimedEvent>) -> Result<Self, String> {
        if ticks_per_beat == 0 {
            return Err("division of zero ticks per beat".into());
        }
        events.sort_by_key(|e| e.tick);

        Ok(Timeline {
            events,
            ticks_per_beat,
        })
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Unscaled length of `delta_ticks` at the given tempo.
    pub fn ticks_to_seconds(&self, delta_ticks: u64, us_per_beat: u32) -> f64 {
        delta_ticks as f64 * (us_per_beat as f64 / US_PER_SECOND) / self.ticks_per_beat as f64
    }
}

fn payload_of(kind: &TrackEventKind<'_>) -> Option<EventPayload> {
    match *kind {
        TrackEventKind::Midi { channel, .. } if channel.as_int() == PERCUSSION_CHANNEL => None,
        TrackEventKind::Midi {
            message: MidiMessage::NoteOn { key, vel },
            ..
        } => Some(EventPayload::NoteOn {
            pitch: key.as_int(),
            velocity: vel.as_int(),
        }),
        TrackEventKind::Midi {
            message: MidiMessage::NoteOff { key, .. },
            ..
        } => Some(EventPayload::NoteOff {
            pitch: key.as_int(),
        }),
        TrackEventKind::Meta(MetaMessage::Tempo(us_per_beat)) => Some(EventPayload::TempoChange {
            us_per_beat: us_per_beat.as_int(),
        }),
        _ => None,
    }
}
