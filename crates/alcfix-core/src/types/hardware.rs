//! Hardware identity types used for fact-table lookups.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// PCI and HDA vendor identifiers referenced by the engine and the built-in table.
pub mod vendor
{
    /// Intel (controllers and integrated graphics).
    pub const INTEL: u32 = 0x8086;
    /// NVIDIA (discrete GPU HDMI/DP audio functions).
    pub const NVIDIA: u32 = 0x10DE;
    /// AMD / ATI (discrete GPU HDMI/DP audio functions).
    pub const AMD: u32 = 0x1002;
    /// Realtek codecs.
    pub const REALTEK: u32 = 0x10EC;
    /// Conexant codecs.
    pub const CONEXANT: u32 = 0x14F1;
    /// IDT / Sigmatel codecs.
    pub const IDT: u32 = 0x111D;
    /// Cirrus Logic codecs.
    pub const CIRRUS: u32 = 0x1013;
}

/// Framebuffer platform qualifier on a fact-table entry or controller.
///
/// Digital controllers attached to an integrated GPU carry the reported
/// framebuffer id; everything else is [`Platform::Any`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform
{
    /// No platform restriction.
    #[default]
    Any,
    /// A specific framebuffer (`AAPL,ig-platform-id`) value.
    Id(u32),
}

impl Platform
{
    /// Whether an entry with this platform qualifier accepts a controller on `instance`.
    ///
    /// `Any` on the entry side accepts everything. A specific id only accepts the
    /// same id; in particular it does not accept an instance that is itself `Any`.
    #[must_use]
    pub fn admits(self, instance: Platform) -> bool
    {
        self == Platform::Any || self == instance
    }
}

impl fmt::Display for Platform
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Platform::Any => write!(f, "any"),
            Platform::Id(id) => write!(f, "{id:08X}"),
        }
    }
}

bitflags! {
    /// Machine models a controller entry applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ModelMask: u32
    {
        /// Portable machines.
        const LAPTOP = 0x1;
        /// Desktop machines.
        const DESKTOP = 0x2;
        /// Any machine.
        const ANY = Self::LAPTOP.bits() | Self::DESKTOP.bits();
    }
}

impl Default for ModelMask
{
    fn default() -> Self
    {
        ModelMask::ANY
    }
}

/// Identity of a controller used for lookups. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareKey
{
    /// PCI vendor id.
    pub vendor: u32,
    /// PCI device id.
    pub device: u32,
    /// PCI revision id.
    pub revision: u32,
    /// Framebuffer platform, `Any` for analog and discrete controllers.
    pub platform: Platform,
}

impl HardwareKey
{
    /// Build a key with no platform qualifier.
    #[must_use]
    pub const fn new(vendor: u32, device: u32, revision: u32) -> Self
    {
        Self {
            vendor,
            device,
            revision,
            platform: Platform::Any,
        }
    }

    /// Attach a framebuffer platform to the key.
    #[must_use]
    pub const fn with_platform(mut self, platform: Platform) -> Self
    {
        self.platform = platform;
        self
    }
}

impl fmt::Display for HardwareKey
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:X}:{:X}:{:X}", self.vendor, self.device, self.revision)
    }
}

/// Split an `IOHDACodecVendorID` value into `(vendor, codec)`.
#[must_use]
pub const fn split_codec_id(value: u32) -> (u32, u32)
{
    (value >> 16, value & 0xFFFF)
}

/// Combine a codec vendor and codec id into the `CodecID` form used by resources.
#[must_use]
pub const fn join_codec_id(vendor: u32, codec: u32) -> u32
{
    (vendor << 16) | (codec & 0xFFFF)
}
