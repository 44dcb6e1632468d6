//! Platform snapshot consumed once per update cycle.

use serde::{Deserialize, Serialize};

use super::{DeviceTree, NodeId};
use crate::types::ModelMask;

/// Who wrote the firmware the machine booted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareVendor
{
    /// Apple EFI. Vendor-supplied `alc-layout-id` is trusted.
    Apple,
    /// Anything else (open-source bootloaders, OEM UEFI).
    #[default]
    Other,
}

/// One discrete GPU with its optional HDMI/DP audio function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalGpu
{
    /// Video function node.
    pub video: NodeId,
    /// Audio function node, when the GPU exposes one.
    pub audio: Option<NodeId>,
    /// PCI vendor id of the GPU.
    pub vendor: u32,
}

/// Snapshot of the audio-relevant platform topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo
{
    /// Built-in digital audio function (`HDAU`).
    pub audio_builtin_digital: Option<NodeId>,
    /// Built-in analog audio function (`HDEF`).
    pub audio_builtin_analog: Option<NodeId>,
    /// Integrated GPU.
    pub video_builtin: Option<NodeId>,
    /// The reported framebuffer has no connectors (headless IGPU).
    pub framebuffer_connectorless: bool,
    /// Discrete GPUs in enumeration order.
    pub video_external: Vec<ExternalGpu>,
    /// Firmware vendor.
    pub firmware_vendor: FirmwareVendor,
    /// Layout id reported to the OS.
    pub reported_layout_id: u32,
    /// Framebuffer id (`AAPL,ig-platform-id`) reported to the OS.
    pub reported_framebuffer_id: u32,
    /// Machine model class.
    pub model: ModelMask,
}

impl DeviceInfo
{
    /// Whether the integrated GPU drives digital audio.
    ///
    /// Requires an IGPU whose framebuffer has connectors, and no
    /// `No-hda-gfx` opt-out on the analog function.
    pub fn has_builtin_digital_audio<T: DeviceTree + ?Sized>(&self, tree: &T) -> bool
    {
        if self.framebuffer_connectorless || self.video_builtin.is_none() {
            return false;
        }
        !self
            .audio_builtin_analog
            .is_some_and(|analog| tree.has_property(analog, "No-hda-gfx"))
    }
}
