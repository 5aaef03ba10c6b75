mod clock;
mod scheduler;
mod timeline;

pub use clock::{Clock, SystemClock};
pub use scheduler::{CancelToken, Scheduler, SessionOutcome, wait_duration};
pub use timeline::{Timeline, US_PER_SECOND};

#[cfg(test)]
pub(crate) use timeline::tests as tests_support;
