//! Set-only progress bits of the load orchestrator.

use bitflags::bitflags;

bitflags! {
    /// One bit per side effect that must happen at most once.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Progress: u32
    {
        /// Controller discovery ran.
        const CONTROLLERS_LOADED = 1 << 0;
        /// Codec enumeration produced at least one validated codec.
        const CODECS_LOADED = 1 << 1;
        /// Controller-start hook installed (or not wanted).
        const PATCH_HDA_CONTROLLER = 1 << 2;
        /// IOHDAFamily hooks installed.
        const PATCH_HDA_FAMILY = 1 << 3;
        /// Platform driver hook installed.
        const PATCH_HDA_PLATFORM_DRIVER = 1 << 4;
        /// A validated codec carries resource files.
        const CALLBACKS_WANT_ROUTING = 1 << 5;
        /// GFX probe hook installed.
        const ROUTED_GFX_PROBE = 1 << 6;
        /// AppleHDA hooks installed.
        const ROUTED_HDA_CALLBACKS = 1 << 7;
    }
}

/// Monotonic progress tracker. Bits are never cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressState
{
    bits: Progress,
}

impl ProgressState
{
    /// Start with nothing done.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Whether every bit in `flag` is set.
    #[must_use]
    pub fn is_set(&self, flag: Progress) -> bool
    {
        self.bits.contains(flag)
    }

    /// Set `flag`, returning `true` if at least one of its bits was not set before.
    pub fn set(&mut self, flag: Progress) -> bool
    {
        let fresh = !self.bits.contains(flag);
        self.bits.insert(flag);
        fresh
    }

    /// Snapshot of all bits.
    #[must_use]
    pub fn bits(&self) -> Progress
    {
        self.bits
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_set_reports_first_transition_only()
    {
        let mut state = ProgressState::new();
        assert!(state.set(Progress::CONTROLLERS_LOADED));
        assert!(!state.set(Progress::CONTROLLERS_LOADED));
        assert!(state.is_set(Progress::CONTROLLERS_LOADED));
        assert!(!state.is_set(Progress::CODECS_LOADED));
    }

    #[test]
    fn test_bits_accumulate()
    {
        let mut state = ProgressState::new();
        state.set(Progress::CONTROLLERS_LOADED);
        state.set(Progress::ROUTED_GFX_PROBE);
        assert_eq!(state.bits(), Progress::CONTROLLERS_LOADED | Progress::ROUTED_GFX_PROBE);
    }
}
