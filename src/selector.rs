use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Held pitches in the order they were pressed. A pitch is never held twice;
/// pressing it again moves it to the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveNotes {
    pitches: Vec<u8>,
}

impl ActiveNotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, pitch: u8) {
        self.pitches.retain(|&p| p != pitch);
        self.pitches.push(pitch);
    }

    /// Returns whether the pitch was held.
    pub fn release(&mut self, pitch: u8) -> bool {
        match self.pitches.iter().position(|&p| p == pitch) {
            Some(idx) => {
                self.pitches.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn latest(&self) -> Option<u8> {
        self.pitches.last().copied()
    }

    pub fn sorted(&self) -> Vec<u8> {
        let mut sorted = self.pitches.clone();
        sorted.sort_unstable();
        sorted
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.pitches
    }

    pub fn len(&self) -> usize {
        self.pitches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pitches.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayMode {
    /// Sound the most recently pressed note.
    #[default]
    Solo,
    /// Cycle through held notes from lowest to highest.
    Chiptune,
}

impl PlayMode {
    pub fn toggled(self) -> Self {
        match self {
            PlayMode::Solo => PlayMode::Chiptune,
            PlayMode::Chiptune => PlayMode::Solo,
        }
    }
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayMode::Solo => write!(f, "solo"),
            PlayMode::Chiptune => write!(f, "chiptune"),
        }
    }
}

/// Picks at most one pitch to sound out of the held notes.
#[derive(Debug, Clone)]
pub enum NoteSelector {
    Solo(LastNotePriority),
    Chiptune(RoundRobinArpeggiator),
}

impl NoteSelector {
    pub fn new(mode: PlayMode) -> Self {
        match mode {
            PlayMode::Solo => NoteSelector::Solo(LastNotePriority),
            PlayMode::Chiptune => NoteSelector::Chiptune(RoundRobinArpeggiator::default()),
        }
    }

    pub fn select(
        &mut self,
        notes: &ActiveNotes,
        now: Duration,
        arpeggio_interval: Duration,
    ) -> Option<u8> {
        match self {
            NoteSelector::Solo(solo) => solo.select(notes),
            NoteSelector::Chiptune(arp) => arp.select(notes, now, arpeggio_interval),
        }
    }

    /// Called for every release event, whether or not the pitch was held.
    pub fn note_released(&mut self) {
        if let NoteSelector::Chiptune(arp) = self {
            arp.reset();
        }
    }

    /// True while the selector switches notes on its own.
    pub fn is_cycling(&self, notes: &ActiveNotes) -> bool {
        matches!(self, NoteSelector::Chiptune(_)) && notes.len() > 1
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LastNotePriority;

impl LastNotePriority {
    pub fn select(&self, notes: &ActiveNotes) -> Option<u8> {
        notes.latest()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoundRobinArpeggiator {
    arp_index: usize,
    /// `None` until the first step of a new cycle is sounded.
    last_switch: Option<Duration>,
}

impl RoundRobinArpeggiator {
    pub fn select(
        &mut self,
        notes: &ActiveNotes,
        now: Duration,
        interval: Duration,
    ) -> Option<u8> {
        match notes.len() {
            0 => None,
            1 => notes.latest(),
            count => {
                match self.last_switch {
                    None => self.last_switch = Some(now),
                    Some(last) if now.saturating_sub(last) >= interval => {
                        self.arp_index = (self.arp_index + 1) % count;
                        self.last_switch = Some(now);
                    }
                    Some(_) => {}
                }
                notes.sorted().get(self.arp_index % count).copied()
            }
        }
    }

    pub fn reset(&mut self) {
        self.arp_index = 0;
        self.last_switch = None;
    }

    pub fn index(&self) -> usize {
        self.arp_index
    }
}
