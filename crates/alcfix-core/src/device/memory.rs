//! In-memory device tree.
//!
//! Backs the replay tool and the test-suite. Nodes live in an arena and are
//! addressed by [`NodeId`]; removal is not supported because the engine never
//! removes nodes.

use super::{DeviceTree, NodeId, PropertyDict, PropertyValue};

const PCI_CONFIG_SIZE: usize = 256;

#[derive(Debug, Clone)]
struct MemoryNode
{
    name: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    properties: PropertyDict,
    config: Option<Vec<u8>>,
    terminable: bool,
    terminated: bool,
}

/// Arena-backed [`DeviceTree`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTree
{
    nodes: Vec<MemoryNode>,
}

impl MemoryTree
{
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// An unknown `parent` leaves the new node parentless.
    fn push(&mut self, name: Option<&str>, parent: Option<NodeId>) -> NodeId
    {
        let id = NodeId::from_raw(self.nodes.len());
        let parent = parent.filter(|parent| parent.raw() < self.nodes.len());
        self.nodes.push(MemoryNode {
            name: name.map(str::to_owned),
            parent,
            children: Vec::new(),
            properties: PropertyDict::new(),
            config: None,
            terminable: true,
            terminated: false,
        });
        if let Some(node) = parent.and_then(|parent| self.nodes.get_mut(parent.raw())) {
            node.children.push(id);
        }
        id
    }

    /// Add a parentless node.
    pub fn add_root(&mut self, name: &str) -> NodeId
    {
        self.push(Some(name), None)
    }

    /// Add a node under `parent`.
    pub fn add_child(&mut self, parent: NodeId, name: &str) -> NodeId
    {
        self.push(Some(name), Some(parent))
    }

    /// Add an unnamed node under `parent`.
    pub fn add_unnamed_child(&mut self, parent: NodeId) -> NodeId
    {
        self.push(None, Some(parent))
    }

    /// Give a node a zeroed PCI configuration space.
    pub fn enable_pci_config(&mut self, node: NodeId)
    {
        if let Some(n) = self.nodes.get_mut(node.raw()) {
            n.config = Some(vec![0; PCI_CONFIG_SIZE]);
        }
    }

    /// Make `terminate` refuse for this node.
    pub fn refuse_termination(&mut self, node: NodeId)
    {
        if let Some(n) = self.nodes.get_mut(node.raw()) {
            n.terminable = false;
        }
    }

    /// Whether `terminate` succeeded on this node.
    #[must_use]
    pub fn is_terminated(&self, node: NodeId) -> bool
    {
        self.nodes.get(node.raw()).is_some_and(|n| n.terminated)
    }

    /// All properties on a node, sorted by key.
    #[must_use]
    pub fn properties(&self, node: NodeId) -> Option<&PropertyDict>
    {
        self.nodes.get(node.raw()).map(|n| &n.properties)
    }

    /// Find the first node with the given name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeId>
    {
        self.nodes
            .iter()
            .position(|n| n.name.as_deref() == Some(name))
            .map(NodeId::from_raw)
    }

    /// Number of nodes in the arena.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.nodes.len()
    }

    /// Whether the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.nodes.is_empty()
    }

    /// Every node id in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_
    {
        (0..self.nodes.len()).map(NodeId::from_raw)
    }
}

impl DeviceTree for MemoryTree
{
    fn name(&self, node: NodeId) -> Option<&str>
    {
        self.nodes.get(node.raw())?.name.as_deref()
    }

    fn rename(&mut self, node: NodeId, name: &str)
    {
        if let Some(entry) = self.nodes.get_mut(node.raw()) {
            entry.name = Some(name.to_owned());
        }
    }

    fn property(&self, node: NodeId, key: &str) -> Option<&PropertyValue>
    {
        self.nodes.get(node.raw())?.properties.get(key)
    }

    fn set_property(&mut self, node: NodeId, key: &str, value: PropertyValue)
    {
        if let Some(entry) = self.nodes.get_mut(node.raw()) {
            entry.properties.insert(key.to_owned(), value);
        }
    }

    fn remove_property(&mut self, node: NodeId, key: &str) -> Option<PropertyValue>
    {
        self.nodes.get_mut(node.raw())?.properties.remove(key)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId>
    {
        self.nodes.get(node.raw())?.parent
    }

    fn children(&self, node: NodeId) -> Vec<NodeId>
    {
        self.nodes.get(node.raw()).map(|n| n.children.clone()).unwrap_or_default()
    }

    fn config_read8(&mut self, node: NodeId, offset: u8) -> Option<u8>
    {
        let config = self.nodes.get(node.raw())?.config.as_ref()?;
        config.get(usize::from(offset)).copied()
    }

    fn config_write8(&mut self, node: NodeId, offset: u8, value: u8) -> bool
    {
        let Some(config) = self.nodes.get_mut(node.raw()).and_then(|n| n.config.as_mut()) else {
            return false;
        };
        match config.get_mut(usize::from(offset)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn terminate(&mut self, node: NodeId) -> bool
    {
        match self.nodes.get_mut(node.raw()) {
            Some(entry) if entry.terminable => {
                entry.terminated = true;
                true
            }
            _ => false,
        }
    }
}
