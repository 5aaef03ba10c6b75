mod buzzer;
mod line;

pub use buzzer::Buzzer;
pub use line::LineTransport;

#[cfg(test)]
pub(crate) use line::written_tones;

/// Highest MIDI pitch.
pub const MAX_PITCH: i32 = 127;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Anything that can be told which single frequency to sound. `0` is silence.
pub trait ToneOutput: Send + Sync {
    fn send(&self, hz: u32);

    fn silence(&self) {
        self.send(0);
    }
}

/// Raw write path to a tone device.
pub trait ToneTransport {
    fn write_tone(&mut self, hz: u32) -> std::io::Result<()>;
}

/// Equal-tempered frequency rounded to whole hertz. Pitch 0 and below is silence.
pub fn note_to_frequency(pitch: i32) -> u32 {
    if pitch <= 0 {
        return 0;
    }
    let pitch = pitch.min(MAX_PITCH);
    (440.0 * 2.0_f64.powf((pitch as f64 - 69.0) / 12.0)).round() as u32
}

pub fn note_to_name(pitch: i32) -> String {
    if pitch <= 0 {
        return "Rest".to_string();
    }
    let pitch = pitch.min(MAX_PITCH);
    format!("{}{}", NOTE_NAMES[(pitch % 12) as usize], pitch / 12 - 1)
}

/// Shifts a pitch by `semitones`, clamped to the MIDI range.
pub fn transpose(pitch: u8, semitones: i8) -> i32 {
    (pitch as i32 + semitones as i32).clamp(0, MAX_PITCH)
}
