//! Resource replacement for drivers that keep layouts as properties.
//!
//! Before layout callbacks existed the driver read `Layouts` and `PathMaps`
//! arrays from its own node at start. Those arrays are rebuilt here from the
//! resource files of the validated codecs.

use tracing::{debug, error};

use super::{Decompressor, ResourceSelector, TreeParser, RESOURCE_BUFFER_LIMIT};
use crate::device::{DeviceTree, NodeId, PropertyDict, PropertyValue};
use crate::error::AlcResult;
use crate::facts::{ResourceFile, ResourceKind};

/// Replacement arrays for one driver node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyResources
{
    /// One layout dictionary per codec with a matching layout file.
    pub layouts: Vec<PropertyValue>,
    /// Path maps merged from every matching platform file.
    pub path_maps: Vec<PropertyValue>,
    /// Per-codec `CodecInfo` dictionaries, Tiger only.
    pub codec_info: Option<Vec<PropertyValue>>,
}

fn unpack(file: &ResourceFile, decompressor: &dyn Decompressor, parser: &dyn TreeParser) -> AlcResult<PropertyDict>
{
    let bytes = decompressor.decompress(&file.data, RESOURCE_BUFFER_LIMIT)?;
    parser.parse_dict(&bytes)
}

/// Default `CodecInfo` entry: software volume on the analog output.
fn codec_info_entry(codec_id: u32) -> PropertyValue
{
    let mut volume = PropertyDict::new();
    volume.insert("SoftwareVolume".to_owned(), PropertyValue::Dict(PropertyDict::new()));
    let mut processing = PropertyDict::new();
    processing.insert("Volume".to_owned(), PropertyValue::Dict(volume));
    let mut analog_out = PropertyDict::new();
    analog_out.insert("SignalProcessing".to_owned(), PropertyValue::Dict(processing));

    let mut entry = PropertyDict::new();
    entry.insert("AnalogOut".to_owned(), PropertyValue::Dict(analog_out));
    entry.insert("CodecID".to_owned(), PropertyValue::Number(u64::from(codec_id)));
    PropertyValue::Dict(entry)
}

impl LegacyResources
{
    /// Collect replacement arrays from the selected resource files.
    ///
    /// `layout_override` replaces `LayoutID` in every collected layout when
    /// injection reported a different layout id to the OS. Files that fail
    /// to decode are skipped.
    #[must_use]
    pub fn collect(
        selector: &ResourceSelector<'_>,
        decompressor: &dyn Decompressor,
        parser: &dyn TreeParser,
        layout_override: Option<u32>,
        with_codec_info: bool,
    ) -> Self
    {
        let mut resources = Self {
            codec_info: with_codec_info.then(Vec::new),
            ..Self::default()
        };

        for codec in selector.codecs.iter() {
            debug!("adding codec {:X}:{:X}:{:X}", codec.vendor, codec.codec, codec.revision);

            if let Some(file) = selector.select_for(codec, ResourceKind::Platform) {
                match unpack(file, decompressor, parser) {
                    Ok(mut platform) => match platform.remove("PathMaps") {
                        Some(PropertyValue::Array(maps)) => resources.path_maps.extend(maps),
                        Some(_) => error!("PathMaps element is not an array"),
                        None => error!("failed to get PathMaps element"),
                    },
                    Err(err) => error!("failed to extract platform data: {err}"),
                }
            }

            if let Some(file) = selector.select_for(codec, ResourceKind::Layout) {
                match unpack(file, decompressor, parser) {
                    Ok(mut layout) => {
                        if let Some(reported) = layout_override {
                            layout.insert("LayoutID".to_owned(), PropertyValue::Number(u64::from(reported)));
                        }
                        resources.layouts.push(PropertyValue::Dict(layout));
                    }
                    Err(err) => error!("failed to extract layout data: {err}"),
                }
            }

            if let Some(info) = resources.codec_info.as_mut() {
                info.push(codec_info_entry(codec.codec_id()));
            }
        }

        resources
    }

    /// Replace the driver's `Layouts`, `PathMaps` and (when collected) `CodecInfo`.
    pub fn apply<T: DeviceTree + ?Sized>(self, tree: &mut T, driver: NodeId)
    {
        debug!("replacing legacy resources: {} layouts, {} path maps", self.layouts.len(), self.path_maps.len());
        tree.set_property(driver, "Layouts", PropertyValue::Array(self.layouts));
        tree.set_property(driver, "PathMaps", PropertyValue::Array(self.path_maps));
        if let Some(info) = self.codec_info {
            tree.set_property(driver, "CodecInfo", PropertyValue::Array(info));
        }
    }
}
