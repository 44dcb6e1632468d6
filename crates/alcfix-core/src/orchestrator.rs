//! # Staged Load Orchestrator
//!
//! Reacts to module-load events delivered in an order the engine does not
//! control. Every side effect that must happen at most once is guarded by a
//! [`Progress`] bit; bits are only ever set.
//!
//! ## Event processing
//!
//! 1. Unknown or switched-off load indices are ignored.
//! 2. The first tracked event discovers and matches controllers.
//! 3. A codec-bearing event enumerates and validates codecs until one succeeds.
//! 4. Controller patches, then codec patches, are applied to every event.
//! 5. Module-specific hooks are installed once.
//! 6. The substrate error state is cleared.
//!
//! ## Ownership
//!
//! One [`Orchestrator`] coordinates a boot. It is produced by consuming an
//! [`OrchestratorBuilder`] and cannot be cloned, so a second coordinator
//! over the same state cannot exist.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::BootArgs;
use crate::device::{display_name, find_ancestor, u32_property, DeviceInfo, DeviceTree, NodeId, PropertyValue};
use crate::facts::{builtin, FactTable, ModuleId, ModuleTable, ResourceKind};
use crate::inject::{inject, InjectionOutcome};
use crate::patcher::hooks::SYM_APPLEHDA_ZLIB;
use crate::patcher::{
    apply_patches, erase_redundant_logs, HookKind, HookTable, ModuleLoad, NvidiaDeviceIdPool, PatchSubstrate,
};
use crate::progress::{Progress, ProgressState};
use crate::registry::{CodecRegistry, ControllerRegistry};
use crate::resources::pinconfig::{self, PowerAction, CONFIG_DEFAULT_KEY};
use crate::resources::{
    Decompressor, LegacyResources, PlistParser, ResourceLoad, ResourceSelector, StoredDecompressor, TreeParser,
    STATUS_SUCCESS,
};
use crate::types::{Address, KernelVersion};

/// Longest accepted controller-start delay in milliseconds.
pub const MAX_START_DELAY_MS: u32 = 3000;

/// Entitlement granted by the driver-host override.
pub const DRIVER_HOST_ENTITLEMENT: &str = "com.apple.private.audio.driver-host";

/// Builder for the single [`Orchestrator`] of a boot.
pub struct OrchestratorBuilder<C = SystemClock>
{
    kernel: KernelVersion,
    facts: Option<FactTable>,
    args: BootArgs,
    clock: C,
    decompressor: Box<dyn Decompressor>,
    parser: Box<dyn TreeParser>,
    pin_configs: Option<Vec<PropertyValue>>,
}

impl OrchestratorBuilder<SystemClock>
{
    /// Start a builder for `kernel` with the built-in fact table and wall clock.
    #[must_use]
    pub fn new(kernel: KernelVersion) -> Self
    {
        Self {
            kernel,
            facts: None,
            args: BootArgs::default(),
            clock: SystemClock,
            decompressor: Box::new(StoredDecompressor),
            parser: Box::new(PlistParser),
            pin_configs: None,
        }
    }
}

impl<C: Clock> OrchestratorBuilder<C>
{
    /// Use `facts` instead of the built-in table.
    #[must_use]
    pub fn facts(mut self, facts: FactTable) -> Self
    {
        self.facts = Some(facts);
        self
    }

    /// Boot arguments read at startup.
    #[must_use]
    pub fn boot_args(mut self, args: BootArgs) -> Self
    {
        self.args = args;
        self
    }

    /// Replace the clock used for settle and start delays.
    #[must_use]
    pub fn clock<D: Clock>(self, clock: D) -> OrchestratorBuilder<D>
    {
        OrchestratorBuilder {
            kernel: self.kernel,
            facts: self.facts,
            args: self.args,
            clock,
            decompressor: self.decompressor,
            parser: self.parser,
            pin_configs: self.pin_configs,
        }
    }

    /// Resource container decompressor.
    #[must_use]
    pub fn decompressor(mut self, decompressor: impl Decompressor + 'static) -> Self
    {
        self.decompressor = Box::new(decompressor);
        self
    }

    /// Resource tree parser.
    #[must_use]
    pub fn parser(mut self, parser: impl TreeParser + 'static) -> Self
    {
        self.parser = Box::new(parser);
        self
    }

    /// Use `configs` as the `HDAConfigDefault` list instead of the built-in one.
    #[must_use]
    pub fn pin_configs(mut self, configs: Vec<PropertyValue>) -> Self
    {
        self.pin_configs = Some(configs);
        self
    }

    /// Finish construction.
    #[must_use]
    pub fn build(self) -> Orchestrator<C>
    {
        let facts = self.facts.unwrap_or_else(|| builtin::table().clone());
        let pin_configs = self
            .pin_configs
            .unwrap_or_else(|| load_pin_configs(self.parser.as_ref(), builtin::PIN_CONFIGS));
        info!(
            "orchestrator for kernel {} with {} controller entries, {} vendors, {} pin configs",
            self.kernel,
            facts.controllers.len(),
            facts.vendors.len(),
            pin_configs.len()
        );
        Orchestrator {
            kernel: self.kernel,
            facts,
            args: self.args,
            modules: ModuleTable::for_kernel(self.kernel),
            progress: ProgressState::new(),
            controllers: ControllerRegistry::new(),
            codecs: CodecRegistry::new(),
            pool: NvidiaDeviceIdPool::default(),
            hooks: HookTable::new(),
            injection: InjectionOutcome::default(),
            compressed_consumer: false,
            clock: self.clock,
            decompressor: self.decompressor,
            parser: self.parser,
            pin_configs,
        }
    }
}

/// Read the `HDAConfigDefault` list out of a pin configuration document.
///
/// Parse failures are logged and produce an empty list.
pub fn load_pin_configs(parser: &dyn TreeParser, data: &[u8]) -> Vec<PropertyValue>
{
    match parser.parse_dict(data) {
        Ok(mut dict) => match dict.remove(CONFIG_DEFAULT_KEY) {
            Some(PropertyValue::Array(configs)) => configs,
            _ => {
                error!("pin configuration document has no {CONFIG_DEFAULT_KEY} array");
                Vec::new()
            }
        },
        Err(err) => {
            error!("failed to parse pin configuration: {err}");
            Vec::new()
        }
    }
}

/// Coordinator of one boot.
pub struct Orchestrator<C = SystemClock>
{
    kernel: KernelVersion,
    facts: FactTable,
    args: BootArgs,
    modules: ModuleTable,
    progress: ProgressState,
    controllers: ControllerRegistry,
    codecs: CodecRegistry,
    pool: NvidiaDeviceIdPool,
    hooks: HookTable,
    injection: InjectionOutcome,
    compressed_consumer: bool,
    clock: C,
    decompressor: Box<dyn Decompressor>,
    parser: Box<dyn TreeParser>,
    pin_configs: Vec<PropertyValue>,
}

impl Orchestrator<SystemClock>
{
    /// Shorthand for [`OrchestratorBuilder::new`].
    #[must_use]
    pub fn builder(kernel: KernelVersion) -> OrchestratorBuilder<SystemClock>
    {
        OrchestratorBuilder::new(kernel)
    }
}

impl<C: Clock> Orchestrator<C>
{
    /// Inject device properties and switch off what injection found unwanted.
    ///
    /// Without verb support `IOHDAFamily` is no longer tracked; without delay
    /// support the controller-start hook is marked as done.
    pub fn update_properties<T: DeviceTree + ?Sized>(&mut self, info: &DeviceInfo, tree: &mut T) -> InjectionOutcome
    {
        let outcome = inject(info, tree, &self.args);
        if !outcome.verbs_enabled {
            self.modules.switch_off(ModuleId::IOHDAFamily);
        }
        if !outcome.delay_enabled {
            self.progress.set(Progress::PATCH_HDA_CONTROLLER);
        }
        self.injection = outcome;
        outcome
    }

    /// Handle a module-load event. Returns `false` when the module is not tracked.
    pub fn process_module<S, T>(
        &mut self,
        substrate: &mut S,
        tree: &T,
        info: &DeviceInfo,
        index: usize,
        base: Address,
        size: usize,
    ) -> bool
    where
        S: PatchSubstrate + ?Sized,
        T: DeviceTree + ?Sized,
    {
        let Some(slot) = self.modules.slot_for_index(index) else {
            return false;
        };
        let module = ModuleLoad {
            index,
            id: slot.id,
            base,
            size,
        };
        debug!("processing {module}");

        if module.id == ModuleId::AppleGFXHDA {
            if self.progress.set(Progress::ROUTED_GFX_PROBE) {
                self.hooks.install(substrate, &module, HookKind::GfxProbe);
            }
            substrate.clear_error();
            return true;
        }

        if self.progress.set(Progress::CONTROLLERS_LOADED) {
            self.controllers.discover(info, tree, &mut self.pool);
            self.controllers.match_all(&self.facts, info.model, &mut self.pool);
        }

        if !self.progress.is_set(Progress::CODECS_LOADED) && module.id.codec_bearing() {
            self.codecs.enumerate(&self.controllers, tree, &mut self.clock);
            if self.codecs.validate(&self.facts) {
                self.progress.set(Progress::CODECS_LOADED);
            } else {
                debug!("failed to find a suitable codec, we have nothing to do");
            }
        }

        self.patch_controllers(substrate, &module);
        self.patch_codecs(substrate, &module);

        if module.id == ModuleId::AppleHDA
            && self.progress.is_set(Progress::CALLBACKS_WANT_ROUTING)
            && self.progress.set(Progress::ROUTED_HDA_CALLBACKS)
        {
            self.route_hda_callbacks(substrate, &module);
        }

        let once = match module.id {
            ModuleId::IOHDAFamily => Some((Progress::PATCH_HDA_FAMILY, HookKind::ExecuteVerb)),
            ModuleId::AppleHDAController => Some((Progress::PATCH_HDA_CONTROLLER, HookKind::HdaControllerStart)),
            ModuleId::AppleHDAPlatformDriver => {
                Some((Progress::PATCH_HDA_PLATFORM_DRIVER, HookKind::PlatformDriverStart))
            }
            _ => None,
        };
        if let Some((flag, kind)) = once {
            if self.progress.set(flag) {
                self.hooks.install(substrate, &module, kind);
            }
        }

        substrate.clear_error();
        true
    }

    fn patch_controllers<S: PatchSubstrate + ?Sized>(&self, substrate: &mut S, module: &ModuleLoad)
    {
        if !self.progress.is_set(Progress::CONTROLLERS_LOADED) {
            return;
        }
        for (index, controller) in self.controllers.iter().enumerate() {
            if controller.info.is_none() {
                debug!("missing fact-table entry for {index} controller");
                continue;
            }
            if controller.no_patch {
                debug!("skipping {index} controller {} due to no-controller-patch", controller.key());
                continue;
            }
            apply_patches(substrate, module, &controller.patches);
        }
        if !self.args.debug {
            erase_redundant_logs(substrate, module);
        }
    }

    fn patch_codecs<S: PatchSubstrate + ?Sized>(&mut self, substrate: &mut S, module: &ModuleLoad)
    {
        if !self.progress.is_set(Progress::CODECS_LOADED) {
            return;
        }
        let mut wants_routing = false;
        for codec in self.codecs.iter() {
            let Some((_, info)) = codec.info.and_then(|matched| self.facts.codec(matched)) else {
                error!("missing fact-table entry for codec {:08X}", codec.codec_id());
                continue;
            };
            if info.has_resources() {
                wants_routing = true;
            }
            apply_patches(substrate, module, &info.patches);
        }
        if wants_routing && self.progress.set(Progress::CALLBACKS_WANT_ROUTING) {
            debug!("will route resource loading callbacks");
        }
    }

    fn route_hda_callbacks<S: PatchSubstrate + ?Sized>(&mut self, substrate: &mut S, module: &ModuleLoad)
    {
        self.hooks.install(substrate, module, HookKind::PowerChange);

        if self.kernel >= KernelVersion::SNOW_LEOPARD
            || substrate.resolve_symbol(module, HookKind::PinConfig.symbol()).is_some()
        {
            self.hooks.install(substrate, module, HookKind::PinConfig);
        } else {
            substrate.clear_error();
            self.hooks.install(substrate, module, HookKind::PinConfigLegacy);
        }

        if substrate.resolve_symbol(module, HookKind::LayoutLoad.symbol()).is_some() {
            self.hooks.install(substrate, module, HookKind::LayoutLoad);
            self.hooks.install(substrate, module, HookKind::PlatformLoad);
        } else {
            substrate.clear_error();
        }

        self.compressed_consumer =
            self.kernel >= KernelVersion::MAVERICKS || substrate.resolve_symbol(module, SYM_APPLEHDA_ZLIB).is_some();
        if !self.compressed_consumer {
            substrate.clear_error();
        }

        if self.kernel == KernelVersion::TIGER {
            self.hooks.install(substrate, module, HookKind::HdaDriverStart);
        }

        if !self.args.debug {
            erase_redundant_logs(substrate, module);
        }
    }

    /// `AppleHDAController::start`: wait for the requested delay, then start.
    ///
    /// The `alcdelay` boot argument wins over the provider's `alc-delay` and
    /// is written back to it.
    pub fn controller_start<T, R>(&mut self, tree: &mut T, provider: NodeId, original: impl FnOnce() -> R) -> R
    where
        T: DeviceTree + ?Sized,
    {
        let requested = if let Some(delay) = self.args.delay {
            debug!("found alc-delay override {delay}");
            tree.set_property(provider, "alc-delay", PropertyValue::data_u32(delay));
            delay
        } else {
            let delay = u32_property(&*tree, provider, "alc-delay").unwrap_or(0);
            debug!("found normal alc-delay {delay}");
            delay
        };

        let delay = clamp_start_delay(requested);
        if delay != 0 {
            debug!("delay AppleHDAController::start for {delay} ms");
            self.clock.sleep(Duration::from_millis(u64::from(delay)));
        }
        original()
    }

    /// `initializePinConfigDefaultFromOverride(IOService*)`.
    pub fn initialize_pin_config<T, R>(
        &self,
        tree: &mut T,
        codec: NodeId,
        config_device: NodeId,
        original: impl FnOnce() -> R,
    ) -> R
    where
        T: DeviceTree + ?Sized,
    {
        let analog = pinconfig::analog_codec(&self.controllers, &self.codecs);
        pinconfig::patch_pin_config(tree, codec, config_device, &self.pin_configs, analog);
        original()
    }

    /// `initializePinConfigDefaultFromOverride()`: the config device is the
    /// enclosing `AppleHDAController`.
    pub fn initialize_pin_config_legacy<T, R>(&self, tree: &mut T, codec: NodeId, original: impl FnOnce() -> R) -> R
    where
        T: DeviceTree + ?Sized,
    {
        match find_ancestor(&*tree, codec, &["AppleHDAController"]) {
            Some(config_device) => {
                let analog = pinconfig::analog_codec(&self.controllers, &self.codecs);
                pinconfig::patch_pin_config(tree, codec, config_device, &self.pin_configs, analog);
            }
            None => error!("failed to get parent AppleHDAController instance"),
        }
        original()
    }

    /// `performPowerStateChange`: run the original, then track sleep and
    /// re-send wake verbs through `reinit` when leaving sleep.
    pub fn power_change<T, R>(
        &self,
        tree: &mut T,
        driver: NodeId,
        (from, to): (u32, u32),
        original: impl FnOnce() -> R,
        reinit: impl FnOnce(NodeId) -> i32,
    ) -> R
    where
        T: DeviceTree + ?Sized,
    {
        let result = original();
        let Some(codec) = tree.parent(driver) else {
            error!("power change failed to obtain hda codec");
            return result;
        };
        if pinconfig::power_transition(tree, codec, from, to) == PowerAction::ForceWake {
            debug!("power change at {} forcing wake verbs", display_name(&*tree, codec));
            let status = reinit(codec);
            if status != STATUS_SUCCESS {
                error!("power change at {} forcing wake returned {status:08X}", display_name(&*tree, codec));
            }
            pinconfig::finish_wake(tree, codec);
        }
        result
    }

    /// Selector over the current registries.
    #[must_use]
    pub fn selector(&self) -> ResourceSelector<'_>
    {
        ResourceSelector {
            facts: &self.facts,
            controllers: &self.controllers,
            codecs: &self.codecs,
            kernel: self.kernel,
        }
    }

    /// Resolve a resource request, passing `original` through when nothing matches.
    #[must_use]
    pub fn load_resource(&self, kind: ResourceKind, original: ResourceLoad) -> ResourceLoad
    {
        self.selector()
            .substitute(kind, original, self.compressed_consumer, self.decompressor.as_ref())
    }

    /// `layoutLoadCallback`: substitute the result, then forward it.
    pub fn layout_load<R>(&self, original: ResourceLoad, forward: impl FnOnce(ResourceLoad) -> R) -> R
    {
        forward(self.load_resource(ResourceKind::Layout, original))
    }

    /// `platformLoadCallback`: substitute the result, then forward it.
    pub fn platform_load<R>(&self, original: ResourceLoad, forward: impl FnOnce(ResourceLoad) -> R) -> R
    {
        forward(self.load_resource(ResourceKind::Platform, original))
    }

    /// `AppleHDAPlatformDriver::start`: replace property-held resources, then start.
    pub fn platform_driver_start<T, R>(&self, tree: &mut T, driver: NodeId, original: impl FnOnce() -> R) -> R
    where
        T: DeviceTree + ?Sized,
    {
        self.replace_legacy_resources(tree, driver, false);
        original()
    }

    /// `AppleHDADriver::start` on Tiger, which also carries `CodecInfo`.
    pub fn hda_driver_start<T, R>(&self, tree: &mut T, driver: NodeId, original: impl FnOnce() -> R) -> R
    where
        T: DeviceTree + ?Sized,
    {
        self.replace_legacy_resources(tree, driver, true);
        original()
    }

    fn replace_legacy_resources<T: DeviceTree + ?Sized>(&self, tree: &mut T, driver: NodeId, with_codec_info: bool)
    {
        debug!("replacing legacy resources of {}", display_name(&*tree, driver));
        LegacyResources::collect(
            &self.selector(),
            self.decompressor.as_ref(),
            self.parser.as_ref(),
            self.injection.layout_override,
            with_codec_info,
        )
        .apply(tree, driver);
    }

    /// Whether the entitlement override should be registered.
    #[must_use]
    pub fn wants_entitlement_hook(&self) -> bool
    {
        if self.kernel < KernelVersion::SIERRA || !self.args.driver_host {
            return false;
        }
        if self.kernel >= KernelVersion::HIGH_SIERRA {
            warn!("consider replacing -alcdhost with legacy_hda_tools_support=1 boot-arg!");
        }
        true
    }

    /// Assign the host load index of a tracked module.
    pub fn assign_load_index(&mut self, id: ModuleId, load_index: usize)
    {
        self.modules.assign_load_index(id, load_index);
    }

    /// Running kernel.
    #[must_use]
    pub fn kernel(&self) -> KernelVersion
    {
        self.kernel
    }

    /// Fact table in use.
    #[must_use]
    pub fn facts(&self) -> &FactTable
    {
        &self.facts
    }

    /// Boot arguments in use.
    #[must_use]
    pub fn boot_args(&self) -> &BootArgs
    {
        &self.args
    }

    /// Tracked modules.
    #[must_use]
    pub fn modules(&self) -> &ModuleTable
    {
        &self.modules
    }

    /// Progress bits.
    #[must_use]
    pub fn progress(&self) -> ProgressState
    {
        self.progress
    }

    /// Discovered controllers.
    #[must_use]
    pub fn controllers(&self) -> &ControllerRegistry
    {
        &self.controllers
    }

    /// Validated codecs.
    #[must_use]
    pub fn codecs(&self) -> &CodecRegistry
    {
        &self.codecs
    }

    /// NVIDIA device-id pool.
    #[must_use]
    pub fn pool(&self) -> &NvidiaDeviceIdPool
    {
        &self.pool
    }

    /// Installed hooks.
    #[must_use]
    pub fn hooks(&self) -> &HookTable
    {
        &self.hooks
    }

    /// Result of the last property injection.
    #[must_use]
    pub fn injection(&self) -> InjectionOutcome
    {
        self.injection
    }

    /// Whether AppleHDA receives resources still compressed.
    #[must_use]
    pub fn compressed_consumer(&self) -> bool
    {
        self.compressed_consumer
    }

    /// `HDAConfigDefault` entries used for pin configuration.
    #[must_use]
    pub fn pin_configs(&self) -> &[PropertyValue]
    {
        &self.pin_configs
    }

    /// Clock used for delays.
    #[must_use]
    pub fn clock(&self) -> &C
    {
        &self.clock
    }
}

/// Clamp a requested controller-start delay; anything above
/// [`MAX_START_DELAY_MS`] is dropped with a warning.
#[must_use]
pub fn clamp_start_delay(requested: u32) -> u32
{
    if requested > MAX_START_DELAY_MS {
        warn!("alc delay cannot exceed {MAX_START_DELAY_MS} ms, ignore it");
        0
    } else {
        requested
    }
}

/// `AppleGFXHDAController::probe`: never claim the analog `HDEF` function.
pub fn gfx_probe<T, R>(tree: &T, provider: NodeId, original: impl FnOnce() -> Option<R>) -> Option<R>
where
    T: DeviceTree + ?Sized,
{
    if tree.name(provider) == Some("HDEF") {
        debug!("AppleGFXHDAController probe refusing HDEF");
        return None;
    }
    original()
}

/// Log line for a codec verb.
#[must_use]
pub fn describe_verb(node: u16, verb: u16, param: u16) -> String
{
    if verb & 0xFF0 != 0 {
        format!("executeVerb nid = 0x{node:02X}, verb = 0x{verb:03X}, param = 0x{param:02X}")
    } else {
        format!("executeVerb nid = 0x{node:02X}, verb = 0x{verb:X}, param = 0x{param:04X}")
    }
}

/// `IOHDACodecDevice::executeVerb`: log and pass through.
pub fn execute_verb<R>(node: u16, verb: u16, param: u16, original: impl FnOnce() -> R) -> R
{
    debug!("{}", describe_verb(node, verb, param));
    original()
}

/// Entitlement override: grant [`DRIVER_HOST_ENTITLEMENT`] when it is not granted yet.
#[must_use]
pub fn handle_entitlement(entitlement: &str, granted: Option<bool>) -> Option<bool>
{
    if granted != Some(true) && entitlement == DRIVER_HOST_ENTITLEMENT {
        debug!("granting {entitlement}");
        Some(true)
    } else {
        granted
    }
}
