//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::cell::Cell;

use alcfix_core::device::{DeviceTree, NodeId, PropertyValue};
use alcfix_core::facts::ModuleId;
use alcfix_core::patcher::HookKind;
use alcfix_core::prelude::*;
use alcfix_core::types::vendor;

pub const ICH10: u32 = (0x3A3E << 16) | vendor::INTEL;
pub const ICH9: u32 = (0x293E << 16) | vendor::INTEL;
pub const ALC885: u32 = (0x10EC << 16) | 0x0885;
pub const ALC892: u32 = (0x10EC << 16) | 0x0892;

pub const IMAGE_BASE: u64 = 0xFFFF_FF7F_8000_0000;

/// Load index of a tracked module in a default module table.
pub fn index_of(id: ModuleId) -> usize
{
    ModuleId::ALL.iter().position(|candidate| *candidate == id).unwrap_or(usize::MAX)
}

/// Image bytes holding `patterns` separated by filler, symbols at the end.
pub fn image(patterns: &[&[u8]]) -> Vec<u8>
{
    let mut bytes = vec![0xCC; 16];
    for pattern in patterns {
        bytes.extend_from_slice(pattern);
        bytes.extend_from_slice(&[0xCC; 8]);
    }
    bytes
}

/// Raw images for AppleHDAController and AppleHDA with every routed symbol.
pub fn substrate(kernel: KernelVersion) -> ImageSubstrate
{
    let mut substrate = ImageSubstrate::new(kernel);

    let controller = image(&[&ICH10.to_le_bytes(), b"Sound as", b"Sound as", b"Sound as"]);
    substrate.add_raw_image(
        index_of(ModuleId::AppleHDAController),
        controller,
        [(HookKind::HdaControllerStart.symbol(), 0x10)],
    );

    let hda = image(&[&ALC885.to_le_bytes(), b"Sound as", b"Sound as"]);
    substrate.add_raw_image(
        index_of(ModuleId::AppleHDA),
        hda,
        [
            (HookKind::PowerChange.symbol(), 0x10),
            (HookKind::PinConfig.symbol(), 0x18),
            (HookKind::LayoutLoad.symbol(), 0x20),
            (HookKind::PlatformLoad.symbol(), 0x28),
        ],
    );

    substrate.add_raw_image(
        index_of(ModuleId::IOHDAFamily),
        image(&[]),
        [(HookKind::ExecuteVerb.symbol(), 0x4)],
    );
    substrate
}

/// Feed one module-load event covering the whole registered image.
pub fn load<C: Clock>(
    orchestrator: &mut Orchestrator<C>,
    substrate: &mut ImageSubstrate,
    tree: &impl DeviceTree,
    info: &DeviceInfo,
    id: ModuleId,
) -> bool
{
    let index = index_of(id);
    let size = substrate.image(index).map_or(0x1000, <[u8]>::len);
    orchestrator.process_module(substrate, tree, info, index, Address::new(IMAGE_BASE), size)
}

/// An ICH9 analog controller with a codec below it.
pub struct AnalogMachine
{
    pub tree: MemoryTree,
    pub info: DeviceInfo,
    pub hdef: NodeId,
    pub codec: NodeId,
    pub driver: NodeId,
}

pub fn analog_machine(codec_id: u32, layout: u32) -> AnalogMachine
{
    let mut tree = MemoryTree::new();
    let pci = tree.add_root("PCI0");
    let hdef = tree.add_child(pci, "HDAS");
    tree.set_property(hdef, "vendor-id", PropertyValue::data_u32(vendor::INTEL));
    tree.set_property(hdef, "device-id", PropertyValue::data_u32(0x293E));
    tree.set_property(hdef, "revision-id", PropertyValue::data_u32(0x03));
    tree.set_property(hdef, "layout-id", PropertyValue::data_u32(layout));
    tree.enable_pci_config(hdef);

    let controller = tree.add_child(hdef, "AppleHDAController");
    let codec = tree.add_child(controller, "IOHDACodecDevice");
    tree.set_property(codec, "IOHDACodecVendorID", PropertyValue::Number(u64::from(codec_id)));
    tree.set_property(codec, "IOHDACodecRevisionID", PropertyValue::Number(0x10_0001));
    let driver = tree.add_child(codec, "AppleHDADriver");

    let info = DeviceInfo {
        audio_builtin_analog: Some(hdef),
        reported_layout_id: 12,
        model: ModelMask::DESKTOP,
        ..DeviceInfo::default()
    };
    AnalogMachine {
        tree,
        info,
        hdef,
        codec,
        driver,
    }
}

/// Device tree that hides every descendant for the first `hidden` walks.
pub struct SettlingTree
{
    pub inner: MemoryTree,
    pub hidden: Cell<usize>,
}

impl DeviceTree for SettlingTree
{
    fn name(&self, node: NodeId) -> Option<&str>
    {
        self.inner.name(node)
    }

    fn rename(&mut self, node: NodeId, name: &str)
    {
        self.inner.rename(node, name);
    }

    fn property(&self, node: NodeId, key: &str) -> Option<&PropertyValue>
    {
        self.inner.property(node, key)
    }

    fn set_property(&mut self, node: NodeId, key: &str, value: PropertyValue)
    {
        self.inner.set_property(node, key, value);
    }

    fn remove_property(&mut self, node: NodeId, key: &str) -> Option<PropertyValue>
    {
        self.inner.remove_property(node, key)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId>
    {
        self.inner.parent(node)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId>
    {
        self.inner.children(node)
    }

    fn descendants(&self, node: NodeId) -> Vec<NodeId>
    {
        let hidden = self.hidden.get();
        if hidden > 0 {
            self.hidden.set(hidden - 1);
            return Vec::new();
        }
        self.inner.descendants(node)
    }
}
