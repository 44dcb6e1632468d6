//! # Hardware Fact Table
//!
//! Static mapping from hardware identity to patch sets and alternate resource
//! files. The table is read-only for the lifetime of the process; registries
//! refer into it by index ([`ControllerMatch`], [`CodecMatch`]) rather than by
//! copying entries.
//!
//! ## Matching
//!
//! Lookups scan entries in declaration order and return the first entry that
//! satisfies the whole predicate. Declaration order is the priority order:
//! specific entries (with revision sets or a platform) must be listed before
//! the general fallback for the same device. Nothing is re-sorted by
//! specificity.

pub mod builtin;
pub mod modules;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

pub use modules::{ModuleId, ModuleTable, TrackedModule};

use crate::types::{HardwareKey, ModelMask, Platform, VersionRange};

/// Search pattern value that stands for "the next free NVIDIA pool id".
pub const NVIDIA_SENTINEL_FIND: u32 = 0x8000_00DE;

/// Revision set of an entry. Empty means any revision.
pub type RevisionSet = SmallVec<[u32; 4]>;

fn revision_admits(revisions: &[u32], revision: u32) -> bool
{
    revisions.is_empty() || revisions.contains(&revision)
}

/// A byte find-and-replace patch scoped to one module and kernel range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulePatch
{
    /// Module the patch applies to.
    pub module: ModuleId,
    /// Bytes to search for.
    pub find: Vec<u8>,
    /// Bytes to write over each occurrence. Same length as `find`.
    pub replace: Vec<u8>,
    /// Number of occurrences to replace, 0 for all.
    #[serde(default)]
    pub count: usize,
    /// Kernels the patch applies to.
    #[serde(default)]
    pub versions: VersionRange,
}

impl ModulePatch
{
    /// Patch every occurrence on every kernel.
    #[must_use]
    pub fn new(module: ModuleId, find: &[u8], replace: &[u8]) -> Self
    {
        Self {
            module,
            find: find.to_vec(),
            replace: replace.to_vec(),
            count: 0,
            versions: VersionRange::ANY,
        }
    }

    /// Limit the number of replaced occurrences.
    #[must_use]
    pub fn with_count(mut self, count: usize) -> Self
    {
        self.count = count;
        self
    }

    /// Limit the kernels the patch applies to.
    #[must_use]
    pub fn with_versions(mut self, versions: VersionRange) -> Self
    {
        self.versions = versions;
        self
    }

    /// Whether the search pattern is the NVIDIA pool placeholder.
    #[must_use]
    pub fn is_nvidia_sentinel(&self) -> bool
    {
        self.find.as_slice() == NVIDIA_SENTINEL_FIND.to_le_bytes()
    }
}

/// Controller fact-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerModInfo
{
    /// Human readable name for logs.
    pub name: String,
    /// PCI vendor id.
    pub vendor: u32,
    /// PCI device id.
    pub device: u32,
    /// Accepted revisions, empty for any.
    #[serde(default)]
    pub revisions: RevisionSet,
    /// Framebuffer platform restriction.
    #[serde(default)]
    pub platform: Platform,
    /// Machine models the entry applies to.
    #[serde(default)]
    pub models: ModelMask,
    /// Patches in application order.
    #[serde(default)]
    pub patches: Vec<ModulePatch>,
}

impl ControllerModInfo
{
    /// The four-part match predicate.
    #[must_use]
    pub fn matches(&self, key: &HardwareKey, model: ModelMask) -> bool
    {
        self.vendor == key.vendor
            && self.device == key.device
            && revision_admits(&self.revisions, key.revision)
            && self.platform.admits(key.platform)
            && self.models.intersects(model)
    }
}

/// Which resource callback a request came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind
{
    /// Pin routing / layout descriptor.
    Layout,
    /// Platform path maps.
    Platform,
}

impl std::fmt::Display for ResourceKind
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self {
            ResourceKind::Layout => f.write_str("layout"),
            ResourceKind::Platform => f.write_str("platform"),
        }
    }
}

/// Alternate resource blob for one layout id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFile
{
    /// Layout id the blob belongs to.
    pub layout: u32,
    /// Kernels the blob applies to.
    #[serde(default)]
    pub versions: VersionRange,
    /// Container bytes (compressed unless the table says otherwise).
    pub data: Vec<u8>,
}

/// Codec fact-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecModInfo
{
    /// Human readable name for logs.
    pub name: String,
    /// Codec id (low 16 bits of `IOHDACodecVendorID`).
    pub codec: u32,
    /// Accepted revisions, empty for any.
    #[serde(default)]
    pub revisions: RevisionSet,
    /// Patches in application order.
    #[serde(default)]
    pub patches: Vec<ModulePatch>,
    /// Platform files.
    #[serde(default)]
    pub platforms: Vec<ResourceFile>,
    /// Layout files.
    #[serde(default)]
    pub layouts: Vec<ResourceFile>,
}

impl CodecModInfo
{
    /// Whether resource callbacks need routing for this codec.
    #[must_use]
    pub fn has_resources(&self) -> bool
    {
        !self.platforms.is_empty() || !self.layouts.is_empty()
    }

    /// Files for one resource kind.
    #[must_use]
    pub fn resource_files(&self, kind: ResourceKind) -> &[ResourceFile]
    {
        match kind {
            ResourceKind::Layout => &self.layouts,
            ResourceKind::Platform => &self.platforms,
        }
    }
}

/// Codec vendor fact-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorModInfo
{
    /// Vendor name for logs.
    pub name: String,
    /// Codec vendor id (high 16 bits of `IOHDACodecVendorID`).
    pub vendor: u32,
    /// Supported codecs in priority order.
    #[serde(default)]
    pub codecs: Vec<CodecModInfo>,
}

/// Reference to a matched controller entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerMatch(usize);

impl ControllerMatch
{
    /// Position of the entry in the table.
    #[must_use]
    pub const fn index(self) -> usize
    {
        self.0
    }
}

/// Reference to a matched codec entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecMatch
{
    vendor: usize,
    codec: usize,
}

/// The complete fact table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactTable
{
    /// Controller entries in priority order.
    #[serde(default)]
    pub controllers: Vec<ControllerModInfo>,
    /// Codec vendors in priority order.
    #[serde(default)]
    pub vendors: Vec<VendorModInfo>,
}

impl FactTable
{
    /// First controller entry matching `key` on a machine of class `model`.
    #[must_use]
    pub fn match_controller(&self, key: &HardwareKey, model: ModelMask) -> Option<ControllerMatch>
    {
        for (index, entry) in self.controllers.iter().enumerate() {
            if entry.matches(key, model) {
                debug!("found mod for controller {key} - {}", entry.name);
                return Some(ControllerMatch(index));
            }
            if entry.vendor != key.vendor || entry.device != key.device {
                continue;
            }
            if !entry.platform.admits(key.platform) {
                debug!("not matching platform {} vs {} for {}", entry.platform, key.platform, entry.name);
            } else if !entry.models.intersects(model) {
                debug!("unsuitable computer model {:?} vs {:?} for {}", entry.models, model, entry.name);
            }
        }
        None
    }

    /// Resolve a controller match.
    #[must_use]
    pub fn controller(&self, matched: ControllerMatch) -> Option<&ControllerModInfo>
    {
        self.controllers.get(matched.0)
    }

    /// First codec entry for `vendor`/`codec`/`revision`.
    ///
    /// The first vendor entry with the right id is authoritative; within it
    /// codecs are scanned in order for an id and revision match.
    #[must_use]
    pub fn match_codec(&self, vendor: u32, codec: u32, revision: u32) -> Option<CodecMatch>
    {
        let Some(vendor_index) = self.vendors.iter().position(|entry| entry.vendor == vendor) else {
            debug!("found unsupported codec vendor 0x{vendor:X}");
            return None;
        };
        let vendor_entry = &self.vendors[vendor_index];
        let found = vendor_entry
            .codecs
            .iter()
            .position(|entry| entry.codec == codec && revision_admits(&entry.revisions, revision));
        match found {
            Some(codec_index) => {
                debug!(
                    "found supported {} {} codec revision 0x{revision:X}",
                    vendor_entry.name, vendor_entry.codecs[codec_index].name
                );
                Some(CodecMatch {
                    vendor: vendor_index,
                    codec: codec_index,
                })
            }
            None => {
                debug!("found unsupported {} codec 0x{codec:X} revision 0x{revision:X}", vendor_entry.name);
                None
            }
        }
    }

    /// Resolve a codec match.
    #[must_use]
    pub fn codec(&self, matched: CodecMatch) -> Option<(&VendorModInfo, &CodecModInfo)>
    {
        let vendor = self.vendors.get(matched.vendor)?;
        let codec = vendor.codecs.get(matched.codec)?;
        Some((vendor, codec))
    }
}
