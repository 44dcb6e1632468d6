//! Function interception catalogue.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use super::{ModuleLoad, PatchSubstrate, Trampoline};
use crate::facts::ModuleId;

/// `AppleHDA_zlib_uncompress`, present when AppleHDA consumes compressed resources.
pub const SYM_APPLEHDA_ZLIB: &str = "__Z24AppleHDA_zlib_uncompressPhPmPKhm";

/// Every routine the engine intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookKind
{
    /// `AppleGFXHDAController::probe`
    GfxProbe,
    /// `AppleHDAController::start`
    HdaControllerStart,
    /// `IOHDACodecDevice::executeVerb`
    ExecuteVerb,
    /// `AppleHDADriver::performPowerStateChange`
    PowerChange,
    /// `AppleHDACodecGeneric::initializePinConfigDefaultFromOverride(IOService*)`
    PinConfig,
    /// `AppleHDACodecGeneric::initializePinConfigDefaultFromOverride()`
    PinConfigLegacy,
    /// `AppleHDADriver::layoutLoadCallback`
    LayoutLoad,
    /// `AppleHDADriver::platformLoadCallback`
    PlatformLoad,
    /// `AppleHDADriver::start`
    HdaDriverStart,
    /// `AppleHDAPlatformDriver::start`
    PlatformDriverStart,
}

impl HookKind
{
    /// Mangled symbol of the intercepted routine.
    #[must_use]
    pub const fn symbol(self) -> &'static str
    {
        match self {
            HookKind::GfxProbe => "__ZN21AppleGFXHDAController5probeEP9IOServicePi",
            HookKind::HdaControllerStart => "__ZN18AppleHDAController5startEP9IOService",
            HookKind::ExecuteVerb => "__ZN16IOHDACodecDevice11executeVerbEtttPjb",
            HookKind::PowerChange => "__ZN14AppleHDADriver23performPowerStateChangeE24_IOAudioDevicePowerStateS0_Pj",
            HookKind::PinConfig => "__ZN20AppleHDACodecGeneric38initializePinConfigDefaultFromOverrideEP9IOService",
            HookKind::PinConfigLegacy => "__ZN20AppleHDACodecGeneric38initializePinConfigDefaultFromOverrideEv",
            HookKind::LayoutLoad => "__ZN14AppleHDADriver18layoutLoadCallbackEjiPKvjPv",
            HookKind::PlatformLoad => "__ZN14AppleHDADriver20platformLoadCallbackEjiPKvjPv",
            HookKind::HdaDriverStart => "__ZN14AppleHDADriver5startEP9IOService",
            HookKind::PlatformDriverStart => "__ZN22AppleHDAPlatformDriver5startEP9IOService",
        }
    }

    /// Module that owns the routine.
    #[must_use]
    pub const fn module(self) -> ModuleId
    {
        match self {
            HookKind::GfxProbe => ModuleId::AppleGFXHDA,
            HookKind::HdaControllerStart => ModuleId::AppleHDAController,
            HookKind::ExecuteVerb => ModuleId::IOHDAFamily,
            HookKind::PlatformDriverStart => ModuleId::AppleHDAPlatformDriver,
            HookKind::PowerChange
            | HookKind::PinConfig
            | HookKind::PinConfigLegacy
            | HookKind::LayoutLoad
            | HookKind::PlatformLoad
            | HookKind::HdaDriverStart => ModuleId::AppleHDA,
        }
    }
}

impl fmt::Display for HookKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::Debug::fmt(self, f)
    }
}

/// Installed hooks and the trampolines to their originals.
#[derive(Debug, Clone, Default)]
pub struct HookTable
{
    installed: BTreeMap<HookKind, Trampoline>,
}

impl HookTable
{
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Install `kind` on `module` unless it is already installed.
    ///
    /// Returns `true` when the hook is in place after the call. Installing
    /// against the wrong module is refused.
    pub fn install<S: PatchSubstrate + ?Sized>(&mut self, substrate: &mut S, module: &ModuleLoad, kind: HookKind) -> bool
    {
        if self.installed.contains_key(&kind) {
            debug!("{kind} already routed");
            return true;
        }
        if kind.module() != module.id {
            warn!("refusing to route {kind} in {}", module.id);
            return false;
        }
        match substrate.install_hook(module, kind.symbol()) {
            Ok(trampoline) => {
                debug!("routed {kind} at {}", trampoline.original);
                self.installed.insert(kind, trampoline);
                true
            }
            Err(err) => {
                warn!("failed to route {kind}: {err}");
                false
            }
        }
    }

    /// Whether `kind` is installed.
    #[must_use]
    pub fn is_installed(&self, kind: HookKind) -> bool
    {
        self.installed.contains_key(&kind)
    }

    /// Trampoline of an installed hook.
    #[must_use]
    pub fn trampoline(&self, kind: HookKind) -> Option<&Trampoline>
    {
        self.installed.get(&kind)
    }

    /// Installed hooks in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (HookKind, &Trampoline)>
    {
        self.installed.iter().map(|(kind, trampoline)| (*kind, trampoline))
    }
}
