//! Audio controllers present on the machine.

use tracing::{debug, error, info};

use crate::device::{display_name, injection_allowed, u32_property, DeviceInfo, DeviceTree, NodeId};
use crate::facts::{ControllerMatch, FactTable, ModulePatch};
use crate::patcher::{substitute_pool_ids, NvidiaDeviceIdPool};
use crate::types::{vendor, HardwareKey, ModelMask, Platform};

/// One discovered controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInstance
{
    /// PCI vendor id.
    pub vendor: u32,
    /// PCI device id.
    pub device: u32,
    /// PCI revision id.
    pub revision: u32,
    /// Framebuffer platform for IGPU-attached digital controllers.
    pub platform: Platform,
    /// Assigned layout id, 0 for digital controllers.
    pub layout: u32,
    /// `no-controller-patch` was present.
    pub no_patch: bool,
    /// Node under which codecs are enumerated, analog controllers only.
    pub detect: Option<NodeId>,
    /// Matched fact-table entry.
    pub info: Option<ControllerMatch>,
    /// Patches of the matched entry with pool ids substituted for this instance.
    pub patches: Vec<ModulePatch>,
}

impl ControllerInstance
{
    /// Create an unmatched instance.
    #[must_use]
    pub fn new(vendor: u32, device: u32, revision: u32) -> Self
    {
        Self {
            vendor,
            device,
            revision,
            platform: Platform::Any,
            layout: 0,
            no_patch: false,
            detect: None,
            info: None,
            patches: Vec::new(),
        }
    }

    /// Lookup key of this instance.
    #[must_use]
    pub fn key(&self) -> HardwareKey
    {
        HardwareKey::new(self.vendor, self.device, self.revision).with_platform(self.platform)
    }
}

/// Ordered list of discovered controllers.
#[derive(Debug, Clone, Default)]
pub struct ControllerRegistry
{
    instances: Vec<ControllerInstance>,
}

impl ControllerRegistry
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Append an instance.
    pub fn insert(&mut self, instance: ControllerInstance)
    {
        debug!(
            "registering controller {:X}:{:X}:{:X} platform {} layout {}",
            instance.vendor, instance.device, instance.revision, instance.platform, instance.layout
        );
        self.instances.push(instance);
    }

    /// Register every controller described by `info`.
    ///
    /// Order: built-in digital (HDAU, or the IGPU itself when there is no
    /// HDAU), each external GPU audio function, then the analog function.
    /// Ids of natively supported NVIDIA functions are reserved in `pool`.
    /// Calling this twice registers everything twice.
    pub fn discover<T: DeviceTree + ?Sized>(&mut self, info: &DeviceInfo, tree: &T, pool: &mut NvidiaDeviceIdPool)
    {
        let builtin_digital = info.has_builtin_digital_audio(tree);
        let framebuffer = Platform::Id(info.reported_framebuffer_id);

        if builtin_digital {
            let digital = match info.audio_builtin_digital {
                Some(hdau) => injection_allowed(tree, hdau).then_some(hdau),
                None => info.video_builtin.filter(|igpu| injection_allowed(tree, *igpu)),
            };
            if let Some(node) = digital {
                if let Some(mut instance) = read_identity(tree, node, Some(vendor::INTEL)) {
                    instance.platform = framebuffer;
                    self.insert(instance);
                }
            }
        }

        for gpu in &info.video_external {
            let Some(audio) = gpu.audio.filter(|audio| injection_allowed(tree, *audio)) else {
                continue;
            };
            let Some(instance) = read_identity(tree, audio, Some(gpu.vendor)) else {
                continue;
            };
            if instance.vendor == vendor::NVIDIA {
                pool.reserve((instance.device << 16) | vendor::NVIDIA);
            }
            self.insert(instance);
        }

        match info.audio_builtin_analog {
            Some(analog) if injection_allowed(tree, analog) => self.discover_analog(tree, analog),
            Some(_) => {}
            None => debug!("no analog audio controller present"),
        }

        debug!("found {} audio controllers", self.instances.len());
    }

    fn discover_analog<T: DeviceTree + ?Sized>(&mut self, tree: &T, analog: NodeId)
    {
        let vendor = u32_property(tree, analog, "vendor-id");
        let device = u32_property(tree, analog, "device-id");
        let revision = u32_property(tree, analog, "revision-id");
        let layout = u32_property(tree, analog, "alc-layout-id");
        let (Some(vendor), Some(device), Some(revision), Some(layout)) = (vendor, device, revision, layout) else {
            error!("failed to obtain device info for analog controller {}", display_name(tree, analog));
            return;
        };
        let mut instance = ControllerInstance::new(vendor, device, revision);
        instance.layout = layout;
        instance.no_patch = tree.has_property(analog, "no-controller-patch");
        instance.detect = Some(analog);
        self.insert(instance);
    }

    /// Match every instance against `facts`, first entry in table order wins.
    ///
    /// Matched instances take a copy of the entry's patches with NVIDIA
    /// sentinels resolved from `pool`, one distinct id per instance.
    pub fn match_all(&mut self, facts: &FactTable, model: ModelMask, pool: &mut NvidiaDeviceIdPool)
    {
        for (index, instance) in self.instances.iter_mut().enumerate() {
            debug!("validating {index} controller {}", instance.key());
            instance.info = facts.match_controller(&instance.key(), model);
            match instance.info.and_then(|matched| facts.controller(matched)) {
                Some(entry) => {
                    debug!("handling {index} controller with {} patches - {}", entry.patches.len(), entry.name);
                    instance.patches = substitute_pool_ids(&entry.patches, pool);
                }
                None => info!("no fact-table entry for {index} controller {}, leaving it inert", instance.key()),
            }
        }
    }

    /// Instance at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ControllerInstance>
    {
        self.instances.get(index)
    }

    /// Instances in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ControllerInstance>
    {
        self.instances.iter()
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.instances.len()
    }

    /// Whether no controller was registered.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.instances.is_empty()
    }
}

/// Read `{vendor, device, revision, no-patch}` from a node.
///
/// `vendor` overrides the node's `vendor-id` where the caller already knows it.
fn read_identity<T: DeviceTree + ?Sized>(tree: &T, node: NodeId, vendor: Option<u32>) -> Option<ControllerInstance>
{
    let vendor = vendor.or_else(|| u32_property(tree, node, "vendor-id"));
    let device = u32_property(tree, node, "device-id");
    let revision = u32_property(tree, node, "revision-id");
    let (Some(vendor), Some(device), Some(revision)) = (vendor, device, revision) else {
        error!("failed to read controller identity from {}", display_name(tree, node));
        return None;
    };
    let mut instance = ControllerInstance::new(vendor, device, revision);
    instance.no_patch = tree.has_property(node, "no-controller-patch");
    Some(instance)
}
