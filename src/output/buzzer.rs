use parking_lot::Mutex;
use tracing::warn;

use super::{ToneOutput, ToneTransport};
use crate::error::PlayerError;

struct BuzzerState<T> {
    transport: T,
    last_hz: Option<u32>,
    writes: u64,
}

/// The one physical tone device. Writes are serialized and a frequency equal
/// to the last one written is not sent again.
pub struct Buzzer<T: ToneTransport> {
    state: Mutex<BuzzerState<T>>,
}

impl<T: ToneTransport> Buzzer<T> {
    pub fn new(transport: T) -> Self {
        Self {
            state: Mutex::new(BuzzerState {
                transport,
                last_hz: None,
                writes: 0,
            }),
        }
    }

    /// Number of writes that reached the device.
    pub fn writes(&self) -> u64 {
        self.state.lock().writes
    }

    pub fn last_sent(&self) -> Option<u32> {
        self.state.lock().last_hz
    }

    /// Forget the last frequency, e.g. after the device was reset.
    pub fn reset(&self) {
        self.state.lock().last_hz = None;
    }

    pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.state.lock().transport)
    }
}

impl<T: ToneTransport + Send> ToneOutput for Buzzer<T> {
    fn send(&self, hz: u32) {
        let mut state = self.state.lock();
        if state.last_hz == Some(hz) {
            return;
        }
        match state.transport.write_tone(hz) {
            Ok(()) => {
                state.last_hz = Some(hz);
                state.writes += 1;
            }
            // The device may come back; the next call retries.
            Err(e) => warn!(hz, error = %PlayerError::Transport(e), "dropping tone"),
        }
    }
}
