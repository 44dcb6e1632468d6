//! Driver modules the engine tracks.
//!
//! The host assigns every tracked module a load index when the engine
//! registers interest. Module-load events carry that index; anything without a
//! slot here is irrelevant and ignored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::KernelVersion;

/// Identity of a tracked driver module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModuleId
{
    /// `com.apple.driver.AppleHDAController`
    AppleHDAController,
    /// `com.apple.driver.AppleHDA`
    AppleHDA,
    /// `com.apple.iokit.IOHDAFamily`
    IOHDAFamily,
    /// `com.apple.driver.AppleGFXHDA`
    AppleGFXHDA,
    /// `com.apple.driver.AppleHDAPlatformDriver`
    AppleHDAPlatformDriver,
}

impl ModuleId
{
    /// Every tracked module in registration order.
    pub const ALL: [ModuleId; 5] = [
        ModuleId::AppleHDAController,
        ModuleId::AppleHDA,
        ModuleId::IOHDAFamily,
        ModuleId::AppleGFXHDA,
        ModuleId::AppleHDAPlatformDriver,
    ];

    /// Bundle identifier the host uses for the module.
    #[must_use]
    pub const fn bundle_id(self) -> &'static str
    {
        match self {
            ModuleId::AppleHDAController => "com.apple.driver.AppleHDAController",
            ModuleId::AppleHDA => "com.apple.driver.AppleHDA",
            ModuleId::IOHDAFamily => "com.apple.iokit.IOHDAFamily",
            ModuleId::AppleGFXHDA => "com.apple.driver.AppleGFXHDA",
            ModuleId::AppleHDAPlatformDriver => "com.apple.driver.AppleHDAPlatformDriver",
        }
    }

    /// Whether codecs may be attached by the time this module loads.
    #[must_use]
    pub const fn codec_bearing(self) -> bool
    {
        matches!(self, ModuleId::AppleHDAController | ModuleId::AppleHDA)
    }

    /// Short name used in logs and fact files.
    #[must_use]
    pub const fn short_name(self) -> &'static str
    {
        match self {
            ModuleId::AppleHDAController => "AppleHDAController",
            ModuleId::AppleHDA => "AppleHDA",
            ModuleId::IOHDAFamily => "IOHDAFamily",
            ModuleId::AppleGFXHDA => "AppleGFXHDA",
            ModuleId::AppleHDAPlatformDriver => "AppleHDAPlatformDriver",
        }
    }
}

impl fmt::Display for ModuleId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.short_name())
    }
}

impl FromStr for ModuleId
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        ModuleId::ALL
            .into_iter()
            .find(|id| id.short_name().eq_ignore_ascii_case(s) || id.bundle_id() == s)
            .ok_or_else(|| format!("Unknown module: {s}"))
    }
}

/// One tracked module slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedModule
{
    /// Module identity.
    pub id: ModuleId,
    /// Index the host reports in load events.
    pub load_index: usize,
    /// Switched-off modules are not patched and their events are ignored.
    pub enabled: bool,
}

/// The set of tracked modules and their host load indices.
#[derive(Debug, Clone)]
pub struct ModuleTable
{
    slots: Vec<TrackedModule>,
}

impl Default for ModuleTable
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl ModuleTable
{
    /// All modules enabled, load index = registration position.
    #[must_use]
    pub fn new() -> Self
    {
        let slots = ModuleId::ALL
            .into_iter()
            .enumerate()
            .map(|(load_index, id)| TrackedModule {
                id,
                load_index,
                enabled: true,
            })
            .collect();
        Self { slots }
    }

    /// Switch off modules the running kernel does not need.
    ///
    /// `AppleGFXHDA` only exists from Mojave on; the platform driver only
    /// carries layouts between Leopard and Snow Leopard.
    #[must_use]
    pub fn for_kernel(kernel: KernelVersion) -> Self
    {
        let mut table = Self::new();
        if kernel < KernelVersion::MOJAVE {
            table.switch_off(ModuleId::AppleGFXHDA);
        }
        if kernel == KernelVersion::TIGER || kernel >= KernelVersion::LION {
            table.switch_off(ModuleId::AppleHDAPlatformDriver);
        }
        table
    }

    /// Record the load index the host assigned to a module.
    pub fn assign_load_index(&mut self, id: ModuleId, load_index: usize)
    {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) {
            slot.load_index = load_index;
        }
    }

    /// Stop tracking a module.
    pub fn switch_off(&mut self, id: ModuleId)
    {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) {
            slot.enabled = false;
        }
    }

    /// Whether a module is still tracked.
    #[must_use]
    pub fn is_enabled(&self, id: ModuleId) -> bool
    {
        self.slots.iter().any(|slot| slot.id == id && slot.enabled)
    }

    /// Resolve a host load index to an enabled slot.
    #[must_use]
    pub fn slot_for_index(&self, load_index: usize) -> Option<TrackedModule>
    {
        self.slots
            .iter()
            .find(|slot| slot.load_index == load_index && slot.enabled)
            .copied()
    }

    /// Host load index of a module, regardless of its enabled state.
    #[must_use]
    pub fn load_index(&self, id: ModuleId) -> Option<usize>
    {
        self.slots.iter().find(|slot| slot.id == id).map(|slot| slot.load_index)
    }

    /// Iterate over all slots.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedModule>
    {
        self.slots.iter()
    }
}
