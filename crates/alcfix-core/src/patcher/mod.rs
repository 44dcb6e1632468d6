//! # Patch Substrate
//!
//! The engine does not rewrite machine code itself. It asks a host-provided
//! substrate to resolve symbols, to replace byte patterns inside a loaded
//! module and to intercept functions.
//!
//! ## Error model
//!
//! Substrate failures are never fatal. Every operation returns an
//! [`AlcResult`]; the engine logs the failure and continues. A substrate may
//! also keep a sticky error state (the way kernel patchers do), which the
//! orchestrator resets with [`PatchSubstrate::clear_error`] after every
//! module event.
//!
//! ## Interception
//!
//! [`PatchSubstrate::install_hook`] returns a [`Trampoline`] describing the
//! redirected routine. The original routine stays reachable only through
//! the trampoline held by the [`HookTable`]; unrelated code never sees it.

pub mod engine;
pub mod hooks;
pub mod image;
pub mod pool;

use std::fmt;

pub use engine::{apply_patches, erase_redundant_logs, substitute_pool_ids};
pub use hooks::{HookKind, HookTable};
pub use image::ImageSubstrate;
pub use pool::NvidiaDeviceIdPool;

use crate::error::AlcResult;
use crate::facts::{ModuleId, ModulePatch};
use crate::types::{Address, KernelVersion, VersionRange};

/// A module-load event as delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleLoad
{
    /// Host load index of the module.
    pub index: usize,
    /// Identity of the tracked module at that index.
    pub id: ModuleId,
    /// Address the module image is mapped at.
    pub base: Address,
    /// Size of the mapped image in bytes.
    pub size: usize,
}

impl fmt::Display for ModuleLoad
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} (#{}) at {} size 0x{:X}", self.id, self.index, self.base, self.size)
    }
}

/// A redirected routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trampoline
{
    /// Mangled symbol that was redirected.
    pub symbol: String,
    /// Address of the original routine.
    pub original: Address,
    /// Address through which the original routine can still be called.
    pub trampoline: Address,
}

/// Binary patching capability provided by the host.
///
/// ## Lifecycle
///
/// 1. The host delivers a module-load event.
/// 2. The engine applies lookup patches and installs hooks on that module.
/// 3. The engine calls [`PatchSubstrate::clear_error`] before returning.
pub trait PatchSubstrate
{
    /// Running kernel version.
    fn kernel_version(&self) -> KernelVersion;

    /// Whether `range` covers the running kernel.
    fn is_version_in_range(&self, range: &VersionRange) -> bool
    {
        range.contains(self.kernel_version())
    }

    /// Resolve a symbol inside a loaded module.
    ///
    /// Returns `None` when the module does not export the symbol. A failed
    /// lookup may leave the sticky error state set.
    fn resolve_symbol(&mut self, module: &ModuleLoad, name: &str) -> Option<Address>;

    /// Replace occurrences of `patch.find` with `patch.replace` inside the
    /// module image.
    ///
    /// ## Errors
    ///
    /// - `PatternNotFound`: no occurrence of the search pattern
    /// - `ModuleNotLoaded`: the substrate has no image for the module
    fn apply_lookup_patch(&mut self, module: &ModuleLoad, patch: &ModulePatch) -> AlcResult<()>;

    /// Redirect the routine named `symbol` inside `module`.
    ///
    /// ## Errors
    ///
    /// - `SymbolNotFound`: the symbol cannot be resolved
    /// - `ModuleNotLoaded`: the substrate has no image for the module
    fn install_hook(&mut self, module: &ModuleLoad, symbol: &str) -> AlcResult<Trampoline>;

    /// Reset the sticky error state.
    fn clear_error(&mut self);
}
