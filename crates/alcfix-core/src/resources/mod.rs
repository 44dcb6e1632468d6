//! # Resource Substitution
//!
//! The audio driver loads its layout and platform descriptors through
//! callbacks. When a validated codec has a resource file for the layout id of
//! its controller, the callback result is replaced by that file; otherwise the
//! original result passes through untouched.
//!
//! ## Selection
//!
//! Codecs are scanned in discovery order and their files in table order. The
//! first file whose layout id equals the controller's layout and whose kernel
//! range covers the running kernel wins.
//!
//! ## Decoding
//!
//! Drivers that understand compressed containers receive the stored bytes.
//! For older drivers the container is decompressed first, limited to
//! [`RESOURCE_BUFFER_LIMIT`]. Decode failures fall back to pass-through.

pub mod legacy;
pub mod pinconfig;
pub mod tree;

use tracing::{debug, error};

pub use legacy::LegacyResources;
pub use pinconfig::{PinConfigOutcome, PowerState};
pub use tree::{Decompressor, Lz4Decompressor, PlistParser, StoredDecompressor, TreeParser, RESOURCE_BUFFER_LIMIT};

use crate::facts::{FactTable, ResourceFile, ResourceKind};
use crate::registry::{CodecInstance, CodecRegistry, ControllerRegistry};
use crate::types::KernelVersion;

/// Success status of a resource request.
pub const STATUS_SUCCESS: i32 = 0;

/// Result of a resource-load request as the driver sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLoad
{
    /// Host status code, [`STATUS_SUCCESS`] on success.
    pub status: i32,
    /// Resource bytes, `None` when the request failed.
    pub data: Option<Vec<u8>>,
}

impl ResourceLoad
{
    /// A failed request, the usual shape for layouts the driver does not ship.
    #[must_use]
    pub fn failed(status: i32) -> Self
    {
        Self { status, data: None }
    }

    /// A successful request.
    #[must_use]
    pub fn success(data: Vec<u8>) -> Self
    {
        Self {
            status: STATUS_SUCCESS,
            data: Some(data),
        }
    }
}

/// Read-only view over everything resource selection needs.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSelector<'a>
{
    /// Fact table the codecs were matched against.
    pub facts: &'a FactTable,
    /// Controllers, for layout ids.
    pub controllers: &'a ControllerRegistry,
    /// Validated codecs.
    pub codecs: &'a CodecRegistry,
    /// Running kernel.
    pub kernel: KernelVersion,
}

impl<'a> ResourceSelector<'a>
{
    /// Layout id assigned to the controller owning `codec`.
    #[must_use]
    pub fn layout_of(&self, codec: &CodecInstance) -> Option<u32>
    {
        self.controllers.get(codec.controller).map(|controller| controller.layout)
    }

    /// File of `kind` selected for one codec.
    #[must_use]
    pub fn select_for(&self, codec: &CodecInstance, kind: ResourceKind) -> Option<&'a ResourceFile>
    {
        let (_, info) = self.facts.codec(codec.info?)?;
        let layout = self.layout_of(codec)?;
        info.resource_files(kind).iter().enumerate().find_map(|(index, file)| {
            debug!("comparing {index} {kind} {:X}/{layout:X}", file.layout);
            (file.layout == layout && file.versions.contains(self.kernel)).then_some(file)
        })
    }

    /// First file of `kind` across all codecs.
    #[must_use]
    pub fn select(&self, kind: ResourceKind) -> Option<(&'a CodecInstance, &'a ResourceFile)>
    {
        self.codecs.iter().find_map(|codec| {
            debug!("checking codec {:X}:{:X}:{:X}", codec.vendor, codec.codec, codec.revision);
            self.select_for(codec, kind).map(|file| (codec, file))
        })
    }

    /// Replace `original` with the selected resource, or pass it through.
    #[must_use]
    pub fn substitute(
        &self,
        kind: ResourceKind,
        original: ResourceLoad,
        consumes_compressed: bool,
        decompressor: &dyn Decompressor,
    ) -> ResourceLoad
    {
        debug!("resource-request arrived {kind}");
        let Some((codec, file)) = self.select(kind) else {
            debug!("no {kind} resource for present codecs, passing through");
            return original;
        };
        debug!("found {kind} for codec {:08X}, compressed consumer {consumes_compressed}", codec.codec_id());
        if consumes_compressed {
            return ResourceLoad::success(file.data.clone());
        }
        match decompressor.decompress(&file.data, RESOURCE_BUFFER_LIMIT) {
            Ok(data) => ResourceLoad::success(data),
            Err(err) => {
                error!("failed to unpack {kind} resource: {err}");
                original
            }
        }
    }
}
