//! # Device Tree Capability
//!
//! The engine never owns the hardware description. It reads and writes typed,
//! named properties on nodes of a tree owned by the host (the I/O registry on
//! a real system, [`MemoryTree`] in tests and in the replay tool).
//!
//! All reads go through explicit presence checks: a property is either
//! [`Some`] with a concrete [`PropertyValue`] or absent. There is no implicit
//! coercion of a missing value to zero.

pub mod info;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use tracing::info;

pub use info::{DeviceInfo, ExternalGpu, FirmwareVendor};
pub use memory::MemoryTree;

/// Handle to a node in a [`DeviceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId
{
    /// Create a handle from a raw value.
    #[must_use]
    pub const fn from_raw(value: usize) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation (useful for logging).
    #[must_use]
    pub const fn raw(self) -> usize
    {
        self.0
    }
}

impl fmt::Display for NodeId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "node#{}", self.0)
    }
}

/// Dictionary form of a property tree.
pub type PropertyDict = BTreeMap<String, PropertyValue>;

/// Typed property value.
///
/// `Data` mirrors raw byte properties as firmware injects them (4-byte
/// little-endian ids, NUL-terminated strings). The collection variants hold
/// parsed resource trees such as `Layouts` and `HDAConfigDefault`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue
{
    /// Raw bytes.
    Data(Vec<u8>),
    /// Unsigned integer.
    Number(u64),
    /// Boolean flag.
    Bool(bool),
    /// String.
    String(String),
    /// Ordered collection.
    Array(Vec<PropertyValue>),
    /// Keyed collection.
    Dict(PropertyDict),
}

impl PropertyValue
{
    /// 4-byte little-endian data, the shape of `layout-id` and `device-id`.
    #[must_use]
    pub fn data_u32(value: u32) -> Self
    {
        PropertyValue::Data(value.to_le_bytes().to_vec())
    }

    /// NUL-terminated string data, the shape of `hda-gfx`.
    #[must_use]
    pub fn c_string(value: &str) -> Self
    {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        PropertyValue::Data(bytes)
    }

    /// Read a 32-bit value.
    ///
    /// Data must be exactly four bytes long; numbers must fit in 32 bits.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32>
    {
        match self {
            PropertyValue::Data(bytes) => {
                let raw: [u8; 4] = bytes.as_slice().try_into().ok()?;
                Some(u32::from_le_bytes(raw))
            }
            PropertyValue::Number(value) => u32::try_from(*value).ok(),
            _ => None,
        }
    }

    /// Read a boolean flag.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool>
    {
        match self {
            PropertyValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Read string data, accepting both `String` and NUL-terminated `Data`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str>
    {
        match self {
            PropertyValue::String(value) => Some(value),
            PropertyValue::Data(bytes) => {
                let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
                std::str::from_utf8(&bytes[..end]).ok()
            }
            _ => None,
        }
    }

    /// Borrow raw bytes.
    #[must_use]
    pub fn as_data(&self) -> Option<&[u8]>
    {
        match self {
            PropertyValue::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Borrow an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&[PropertyValue]>
    {
        match self {
            PropertyValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow a dictionary.
    #[must_use]
    pub fn as_dict(&self) -> Option<&PropertyDict>
    {
        match self {
            PropertyValue::Dict(dict) => Some(dict),
            _ => None,
        }
    }
}

/// Capability interface over the host's device tree.
///
/// Only `name`, `rename`, `property`, `set_property`, `parent` and `children`
/// are required. PCI configuration access and termination default to
/// "unsupported", which the engine logs and treats as a skipped step.
pub trait DeviceTree
{
    /// Node name in the service plane (e.g. `HDEF`), if it has one.
    fn name(&self, node: NodeId) -> Option<&str>;

    /// Change a node's name.
    fn rename(&mut self, node: NodeId, name: &str);

    /// Look up a property.
    fn property(&self, node: NodeId, key: &str) -> Option<&PropertyValue>;

    /// Set (or replace) a property.
    fn set_property(&mut self, node: NodeId, key: &str, value: PropertyValue);

    /// Remove a property, returning the previous value.
    fn remove_property(&mut self, node: NodeId, key: &str) -> Option<PropertyValue>;

    /// Parent node, `None` at the root.
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Direct children in registration order.
    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Whether a property is present at all.
    fn has_property(&self, node: NodeId, key: &str) -> bool
    {
        self.property(node, key).is_some()
    }

    /// All nodes below `node`, depth-first in registration order.
    fn descendants(&self, node: NodeId) -> Vec<NodeId>
    {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            found.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        found
    }

    /// Read one byte of PCI configuration space.
    fn config_read8(&mut self, _node: NodeId, _offset: u8) -> Option<u8>
    {
        None
    }

    /// Write one byte of PCI configuration space. Returns `false` when unsupported.
    fn config_write8(&mut self, _node: NodeId, _offset: u8, _value: u8) -> bool
    {
        false
    }

    /// Stop and detach the driver attached to `node`. Returns `false` when refused.
    fn terminate(&mut self, _node: NodeId) -> bool
    {
        false
    }
}

/// Read a 32-bit property, `None` if absent or not 32-bit shaped.
pub fn u32_property<T: DeviceTree + ?Sized>(tree: &T, node: NodeId, key: &str) -> Option<u32>
{
    tree.property(node, key).and_then(PropertyValue::as_u32)
}

/// Read a boolean flag property.
pub fn bool_property<T: DeviceTree + ?Sized>(tree: &T, node: NodeId, key: &str) -> Option<bool>
{
    tree.property(node, key).and_then(PropertyValue::as_bool)
}

/// Node name for log lines.
pub fn display_name<T: DeviceTree + ?Sized>(tree: &T, node: NodeId) -> String
{
    tree.name(node).map_or_else(|| format!("(unnamed {node})"), str::to_owned)
}

/// Walk up from `node` (exclusive) to the first ancestor whose name is in `names`.
pub fn find_ancestor<T: DeviceTree + ?Sized>(tree: &T, node: NodeId, names: &[&str]) -> Option<NodeId>
{
    let mut current = tree.parent(node);
    while let Some(candidate) = current {
        if tree.name(candidate).is_some_and(|name| names.contains(&name)) {
            return Some(candidate);
        }
        current = tree.parent(candidate);
    }
    None
}

/// Whether injection into `node` is allowed (no `no-controller-inject` opt-out).
pub fn injection_allowed<T: DeviceTree + ?Sized>(tree: &T, node: NodeId) -> bool
{
    if tree.has_property(node, "no-controller-inject") {
        info!("not injecting {}", display_name(tree, node));
        return false;
    }
    true
}
