//! Settling delays.
//!
//! Codec enumeration and the controller-start delay wait through a [`Clock`]
//! so tests can observe the requested delays without real time passing.

use std::time::Duration;

/// Source of blocking delays.
pub trait Clock
{
    /// Block the current context for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// Wall clock backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock
{
    fn sleep(&mut self, duration: Duration)
    {
        std::thread::sleep(duration);
    }
}

/// Clock that records every requested delay and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct RecordingClock
{
    /// Delays in request order.
    pub sleeps: Vec<Duration>,
}

impl RecordingClock
{
    /// Sum of all recorded delays.
    #[must_use]
    pub fn total(&self) -> Duration
    {
        self.sleeps.iter().sum()
    }
}

impl Clock for RecordingClock
{
    fn sleep(&mut self, duration: Duration)
    {
        self.sleeps.push(duration);
    }
}
