//! Codecs attached to analog controllers.
//!
//! The codec subtree may still be under construction when the first
//! codec-bearing module loads, so enumeration retries a bounded number of
//! times and callers re-run it on the next opportunity when nothing is found.

use std::time::Duration;

use tracing::{debug, error, info};

use super::ControllerRegistry;
use crate::clock::Clock;
use crate::device::{display_name, DeviceTree, NodeId, PropertyValue};
use crate::facts::{CodecMatch, FactTable};
use crate::types::{join_codec_id, split_codec_id};

/// Enumeration attempts per controller.
pub const ENUMERATION_ATTEMPTS: usize = 4;

/// Settling delay between attempts.
pub const SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Property carrying `(vendor << 16) | codec`.
pub const CODEC_VENDOR_KEY: &str = "IOHDACodecVendorID";

/// Property carrying the codec revision.
pub const CODEC_REVISION_KEY: &str = "IOHDACodecRevisionID";

/// One discovered codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInstance
{
    /// Index of the owning controller in the controller registry.
    pub controller: usize,
    /// Codec vendor id.
    pub vendor: u32,
    /// Codec id.
    pub codec: u32,
    /// Codec revision.
    pub revision: u32,
    /// Node the identity was read from.
    pub node: NodeId,
    /// Matched fact-table entry.
    pub info: Option<CodecMatch>,
}

impl CodecInstance
{
    /// `(vendor << 16) | codec`.
    #[must_use]
    pub fn codec_id(&self) -> u32
    {
        join_codec_id(self.vendor, self.codec)
    }
}

enum Probe
{
    Found(u32, u32, NodeId),
    Invalid,
    Missing,
}

fn probe<T: DeviceTree + ?Sized>(tree: &T, anchor: NodeId) -> Probe
{
    let Some(node) = tree.descendants(anchor).into_iter().find(|node| tree.has_property(*node, CODEC_VENDOR_KEY)) else {
        return Probe::Missing;
    };
    debug!("found analog codec {}", display_name(tree, node));
    let vendor = tree.property(node, CODEC_VENDOR_KEY).and_then(PropertyValue::as_u32);
    let revision = tree.property(node, CODEC_REVISION_KEY).and_then(PropertyValue::as_u32);
    match (vendor, revision) {
        (Some(vendor), Some(revision)) => Probe::Found(vendor, revision, node),
        (Some(_), None) if !tree.has_property(node, CODEC_REVISION_KEY) => {
            debug!("codec entry misses properties, skipping");
            Probe::Missing
        }
        _ => {
            error!("codec entry contains invalid properties, skipping");
            Probe::Invalid
        }
    }
}

/// Validated codecs.
#[derive(Debug, Clone, Default)]
pub struct CodecRegistry
{
    codecs: Vec<CodecInstance>,
}

impl CodecRegistry
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Enumerate codecs below every controller with a detect anchor.
    ///
    /// Previous contents are discarded. Each controller is probed up to
    /// [`ENUMERATION_ATTEMPTS`] times with [`SETTLE_DELAY`] between failed
    /// attempts. Returns the number of codecs found.
    pub fn enumerate<T, C>(&mut self, controllers: &ControllerRegistry, tree: &T, clock: &mut C) -> usize
    where
        T: DeviceTree + ?Sized,
        C: Clock + ?Sized,
    {
        self.codecs.clear();
        for (index, controller) in controllers.iter().enumerate() {
            let Some(anchor) = controller.detect else {
                continue;
            };
            for attempt in 0..ENUMERATION_ATTEMPTS {
                if attempt > 0 {
                    clock.sleep(SETTLE_DELAY);
                }
                match probe(tree, anchor) {
                    Probe::Found(raw_vendor, revision, node) => {
                        let (vendor, codec) = split_codec_id(raw_vendor);
                        debug!("storing codec info for {vendor:X}:{codec:X}:{revision:X}");
                        self.codecs.push(CodecInstance {
                            controller: index,
                            vendor,
                            codec,
                            revision,
                            node,
                            info: None,
                        });
                        break;
                    }
                    Probe::Invalid => break,
                    Probe::Missing => debug!("failed to find {CODEC_VENDOR_KEY}, retrying {attempt}"),
                }
            }
        }
        self.codecs.len()
    }

    /// Match codecs against `facts` and drop every codec without an entry.
    ///
    /// Returns whether at least one codec remains.
    pub fn validate(&mut self, facts: &FactTable) -> bool
    {
        self.codecs.retain_mut(|codec| {
            codec.info = facts.match_codec(codec.vendor, codec.codec, codec.revision);
            codec.info.is_some()
        });
        if self.codecs.is_empty() {
            info!("no supported codecs remain");
        }
        !self.codecs.is_empty()
    }

    /// Codec at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&CodecInstance>
    {
        self.codecs.get(index)
    }

    /// Codecs in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &CodecInstance>
    {
        self.codecs.iter()
    }

    /// Number of codecs.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.codecs.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.codecs.is_empty()
    }
}
