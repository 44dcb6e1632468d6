//! # Recorded Boot Scenarios
//!
//! A scenario is a JSON document describing one boot: the device tree as
//! firmware left it, the driver images the host would map, and the ordered
//! events the host delivers (module loads, hooked driver calls, resource
//! requests). [`replay`] feeds the events through an [`Orchestrator`] against
//! a [`MemoryTree`] and an [`ImageSubstrate`].
//!
//! ## Example
//!
//! ```json
//! {
//!   "kernel": 19,
//!   "platform": { "analog": "hdef", "layout_id": 12, "model": "DESKTOP" },
//!   "nodes": [
//!     { "id": "pci0", "name": "PCI0" },
//!     { "id": "hdef", "name": "HDAS", "parent": "pci0", "pci_config": true,
//!       "properties": { "vendor-id": { "u32": 32902 }, "device-id": { "u32": 10558 } } }
//!   ],
//!   "images": [ { "module": "AppleHDAController", "hex": "86803e3a" } ],
//!   "events": [ { "event": "load", "module": "AppleHDAController" } ]
//! }
//! ```

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use alcfix_core::device::{DeviceInfo, DeviceTree, ExternalGpu, FirmwareVendor, MemoryTree, NodeId, PropertyValue};
use alcfix_core::facts::{ModuleId, ResourceKind};
use alcfix_core::orchestrator::{describe_verb, execute_verb, gfx_probe, handle_entitlement};
use alcfix_core::prelude::{Address, ImageSubstrate, KernelVersion, ModelMask, Orchestrator, RecordingClock};
use alcfix_core::resources::ResourceLoad;
use serde::Deserialize;
use tracing::{debug, info};

/// Default mapping address of the first tracked module.
pub const DEFAULT_IMAGE_BASE: u64 = 0xFFFF_FF7F_8000_0000;

/// Address stride between default module mappings.
const IMAGE_STRIDE: u64 = 0x100_0000;

/// Errors raised while loading or replaying a scenario.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError
{
    /// Reading a scenario or image file failed
    #[error("Failed to read {}: {source}", path.display())]
    Io
    {
        /// File that could not be read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The scenario is not valid JSON for the expected shape
    #[error("Invalid scenario: {0}")]
    Json(#[from] serde_json::Error),

    /// An event or node refers to an undeclared node id
    #[error("Unknown node id: {0}")]
    UnknownNode(String),

    /// Two nodes share an id
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    /// A hex string could not be decoded
    #[error("Invalid hex in {context}: {source}")]
    Hex
    {
        /// Where the string appeared
        context: String,
        /// Underlying error
        source: hex::FromHexError,
    },

    /// An image entry carries neither or both of `hex` and `object`
    #[error("Image for {0} needs exactly one of 'hex' or 'object'")]
    ImageSource(ModuleId),

    /// An object image could not be parsed
    #[error("Failed to load image for {module}: {source}")]
    Image
    {
        /// Module the image belongs to
        module: ModuleId,
        /// Underlying error
        source: alcfix_core::AlcError,
    },

    /// The module table has no slot for a module
    #[error("Module {0} is not tracked")]
    UntrackedModule(ModuleId),
}

/// One recorded boot.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario
{
    /// Darwin major version of the running kernel.
    pub kernel: KernelVersion,
    /// Boot-arguments line, used when none is given on the command line.
    #[serde(default)]
    pub boot_args: String,
    /// Platform snapshot.
    #[serde(default)]
    pub platform: PlatformSpec,
    /// Device tree nodes, parents before children.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    /// Driver images.
    #[serde(default)]
    pub images: Vec<ImageSpec>,
    /// Host events in delivery order.
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(skip)]
    base_dir: PathBuf,
}

/// Audio-relevant topology, by node id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformSpec
{
    /// Built-in analog function.
    pub analog: Option<String>,
    /// Built-in digital function.
    pub digital: Option<String>,
    /// Integrated GPU.
    pub igpu: Option<String>,
    /// The IGPU framebuffer has no connectors.
    #[serde(default)]
    pub connectorless: bool,
    /// Discrete GPUs in enumeration order.
    #[serde(default)]
    pub gpus: Vec<GpuSpec>,
    /// Firmware vendor.
    #[serde(default)]
    pub firmware: FirmwareVendor,
    /// Layout id reported to the OS.
    #[serde(default)]
    pub layout_id: u32,
    /// Framebuffer id reported to the OS.
    #[serde(default)]
    pub framebuffer_id: u32,
    /// Machine model class.
    #[serde(default)]
    pub model: ModelMask,
}

/// A discrete GPU.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GpuSpec
{
    /// Video function node id.
    pub video: String,
    /// Audio function node id.
    pub audio: Option<String>,
    /// PCI vendor id.
    pub vendor: u32,
}

/// A device tree node.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec
{
    /// Scenario-local id other entries refer to.
    pub id: String,
    /// Service plane name. Unnamed nodes are allowed below a parent.
    pub name: Option<String>,
    /// Parent node id.
    pub parent: Option<String>,
    /// Initial properties.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySpec>,
    /// Back the node with a 256-byte PCI configuration space.
    #[serde(default)]
    pub pci_config: bool,
    /// Refuse driver termination.
    #[serde(default)]
    pub refuse_termination: bool,
}

/// Property value in scenario form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertySpec
{
    /// 4-byte little-endian data.
    U32(u32),
    /// Raw data as hex.
    Data(String),
    /// NUL-terminated string data.
    CString(String),
    /// String.
    String(String),
    /// Number.
    Number(u64),
    /// Boolean.
    Bool(bool),
    /// Array.
    Array(Vec<PropertySpec>),
    /// Dictionary.
    Dict(BTreeMap<String, PropertySpec>),
}

impl PropertySpec
{
    /// Convert to an engine property value.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Hex`] when `Data` is not valid hex.
    pub fn to_value(&self, key: &str) -> Result<PropertyValue, ScenarioError>
    {
        Ok(match self {
            PropertySpec::U32(value) => PropertyValue::data_u32(*value),
            PropertySpec::Data(value) => PropertyValue::Data(decode_hex(key, value)?),
            PropertySpec::CString(value) => PropertyValue::c_string(value),
            PropertySpec::String(value) => PropertyValue::String(value.clone()),
            PropertySpec::Number(value) => PropertyValue::Number(*value),
            PropertySpec::Bool(value) => PropertyValue::Bool(*value),
            PropertySpec::Array(items) => {
                PropertyValue::Array(items.iter().map(|item| item.to_value(key)).collect::<Result<_, _>>()?)
            }
            PropertySpec::Dict(entries) => PropertyValue::Dict(
                entries
                    .iter()
                    .map(|(name, item)| Ok((name.clone(), item.to_value(name)?)))
                    .collect::<Result<_, ScenarioError>>()?,
            ),
        })
    }
}

/// A driver image.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageSpec
{
    /// Module the image belongs to.
    pub module: ModuleId,
    /// Raw image bytes as hex.
    pub hex: Option<String>,
    /// Object file (Mach-O, ELF) relative to the scenario file.
    pub object: Option<PathBuf>,
    /// Symbol offsets for raw images.
    #[serde(default)]
    pub symbols: BTreeMap<String, u64>,
    /// Host load index, when it differs from the registration position.
    pub load_index: Option<usize>,
}

/// One host event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event
{
    /// A module finished loading.
    Load
    {
        /// Module identity.
        module: ModuleId,
        /// Mapping address, defaults to a per-module slot.
        base: Option<u64>,
        /// Mapped size, defaults to the image size.
        size: Option<usize>,
    },
    /// `AppleHDAController::start`.
    ControllerStart
    {
        /// Provider node.
        provider: String,
    },
    /// Pin default initialization. Without `config_device` the legacy
    /// variant runs and looks the device up itself.
    PinConfig
    {
        /// Codec node.
        codec: String,
        /// Config device node.
        config_device: Option<String>,
    },
    /// Driver power state transition.
    PowerChange
    {
        /// `AppleHDADriver` node.
        driver: String,
        /// Previous state.
        from: u32,
        /// New state.
        to: u32,
    },
    /// Resource request through the layout or platform callback.
    Resource
    {
        /// Request type.
        kind: ResourceKind,
        /// Status the stock callback returned.
        #[serde(default)]
        status: i32,
        /// Data the stock callback returned, as hex.
        data: Option<String>,
    },
    /// `AppleHDAPlatformDriver::start`.
    PlatformDriverStart
    {
        /// Driver node.
        driver: String,
    },
    /// `AppleHDADriver::start` on Tiger.
    HdaDriverStart
    {
        /// Driver node.
        driver: String,
    },
    /// Digital audio probe.
    GfxProbe
    {
        /// Provider node.
        provider: String,
    },
    /// Codec verb.
    Verb
    {
        /// Node id.
        node: u16,
        /// Verb.
        verb: u16,
        /// Parameter.
        param: u16,
    },
    /// Entitlement query from the audio driver host.
    Entitlement
    {
        /// Entitlement name.
        name: String,
        /// Stock answer.
        granted: Option<bool>,
    },
}

impl Scenario
{
    /// Parse a scenario from a JSON string. Object paths resolve against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::Json`] when the document does not describe a scenario.
    pub fn from_json(json: &str, base_dir: &Path) -> Result<Self, ScenarioError>
    {
        let mut scenario: Scenario = serde_json::from_str(json)?;
        base_dir.clone_into(&mut scenario.base_dir);
        Ok(scenario)
    }

    /// Read a scenario file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, ScenarioError>
    {
        let json = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        Self::from_json(&json, base_dir)
    }
}

/// Device tree and platform snapshot built from a scenario.
#[derive(Debug, Clone)]
pub struct Machine
{
    /// The tree.
    pub tree: MemoryTree,
    /// Platform snapshot.
    pub info: DeviceInfo,
    /// Declared node ids in declaration order.
    pub nodes: Vec<(String, NodeId)>,
    lookup: HashMap<String, NodeId>,
}

impl Machine
{
    /// Build the tree and snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate or unknown node ids and malformed property data.
    pub fn build(scenario: &Scenario) -> Result<Self, ScenarioError>
    {
        let mut machine = Self {
            tree: MemoryTree::new(),
            info: DeviceInfo::default(),
            nodes: Vec::new(),
            lookup: HashMap::new(),
        };

        for declared in &scenario.nodes {
            if machine.lookup.contains_key(&declared.id) {
                return Err(ScenarioError::DuplicateNode(declared.id.clone()));
            }
            let node = match (&declared.parent, &declared.name) {
                (Some(parent), Some(name)) => {
                    let parent = machine.node(parent)?;
                    machine.tree.add_child(parent, name)
                }
                (Some(parent), None) => {
                    let parent = machine.node(parent)?;
                    machine.tree.add_unnamed_child(parent)
                }
                (None, name) => machine.tree.add_root(name.as_deref().unwrap_or(&declared.id)),
            };
            for (key, value) in &declared.properties {
                machine.tree.set_property(node, key, value.to_value(key)?);
            }
            if declared.pci_config {
                machine.tree.enable_pci_config(node);
            }
            if declared.refuse_termination {
                machine.tree.refuse_termination(node);
            }
            machine.lookup.insert(declared.id.clone(), node);
            machine.nodes.push((declared.id.clone(), node));
        }

        let platform = &scenario.platform;
        machine.info = DeviceInfo {
            audio_builtin_digital: machine.optional_node(platform.digital.as_deref())?,
            audio_builtin_analog: machine.optional_node(platform.analog.as_deref())?,
            video_builtin: machine.optional_node(platform.igpu.as_deref())?,
            framebuffer_connectorless: platform.connectorless,
            video_external: platform
                .gpus
                .iter()
                .map(|gpu| {
                    Ok(ExternalGpu {
                        video: machine.node(&gpu.video)?,
                        audio: machine.optional_node(gpu.audio.as_deref())?,
                        vendor: gpu.vendor,
                    })
                })
                .collect::<Result<_, ScenarioError>>()?,
            firmware_vendor: platform.firmware,
            reported_layout_id: platform.layout_id,
            reported_framebuffer_id: platform.framebuffer_id,
            model: platform.model,
        };
        Ok(machine)
    }

    /// Resolve a scenario node id.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::UnknownNode`] for undeclared ids.
    pub fn node(&self, id: &str) -> Result<NodeId, ScenarioError>
    {
        self.lookup
            .get(id)
            .copied()
            .ok_or_else(|| ScenarioError::UnknownNode(id.to_owned()))
    }

    fn optional_node(&self, id: Option<&str>) -> Result<Option<NodeId>, ScenarioError>
    {
        id.map(|id| self.node(id)).transpose()
    }
}

/// Register the scenario's images with a substrate, honouring custom load indices.
///
/// # Errors
///
/// Returns an error when an image has no usable source or cannot be parsed.
pub fn load_images(
    scenario: &Scenario,
    orchestrator: &mut Orchestrator<RecordingClock>,
) -> Result<ImageSubstrate, ScenarioError>
{
    let mut substrate = ImageSubstrate::new(scenario.kernel);
    for spec in &scenario.images {
        if let Some(load_index) = spec.load_index {
            orchestrator.assign_load_index(spec.module, load_index);
        }
        let index = orchestrator
            .modules()
            .load_index(spec.module)
            .ok_or(ScenarioError::UntrackedModule(spec.module))?;

        match (&spec.hex, &spec.object) {
            (Some(hex), None) => {
                let bytes = decode_hex(spec.module.short_name(), hex)?;
                let symbols = spec.symbols.iter().map(|(name, offset)| (name.clone(), *offset));
                substrate.add_raw_image(index, bytes, symbols);
            }
            (None, Some(object)) => {
                let path = scenario.base_dir.join(object);
                let bytes = fs::read(&path).map_err(|source| ScenarioError::Io { path, source })?;
                let count = substrate
                    .add_object_image(index, bytes)
                    .map_err(|source| ScenarioError::Image {
                        module: spec.module,
                        source,
                    })?;
                debug!("{} image has {count} symbols", spec.module);
            }
            _ => return Err(ScenarioError::ImageSource(spec.module)),
        }
    }
    Ok(substrate)
}

/// Feed every event through the orchestrator. Returns one line per event.
///
/// # Errors
///
/// Returns an error when an event refers to an unknown node or module.
pub fn replay(
    scenario: &Scenario,
    machine: &mut Machine,
    orchestrator: &mut Orchestrator<RecordingClock>,
    substrate: &mut ImageSubstrate,
) -> Result<Vec<String>, ScenarioError>
{
    let outcome = orchestrator.update_properties(&machine.info, &mut machine.tree);
    info!(
        "properties updated: verbs {}, delay {}, layout override {:?}",
        outcome.verbs_enabled, outcome.delay_enabled, outcome.layout_override
    );

    let mut log = Vec::with_capacity(scenario.events.len());
    for event in &scenario.events {
        let line = replay_event(event, machine, orchestrator, substrate)?;
        debug!("{line}");
        log.push(line);
    }
    Ok(log)
}

fn replay_event(
    event: &Event,
    machine: &mut Machine,
    orchestrator: &mut Orchestrator<RecordingClock>,
    substrate: &mut ImageSubstrate,
) -> Result<String, ScenarioError>
{
    Ok(match event {
        Event::Load { module, base, size } => {
            let index = orchestrator
                .modules()
                .load_index(*module)
                .ok_or(ScenarioError::UntrackedModule(*module))?;
            let base = base.unwrap_or_else(|| DEFAULT_IMAGE_BASE + IMAGE_STRIDE * index as u64);
            let size = size.unwrap_or_else(|| substrate.image(index).map_or(0, <[u8]>::len));
            let handled =
                orchestrator.process_module(substrate, &machine.tree, &machine.info, index, Address::new(base), size);
            format!("load {module}: {}", if handled { "handled" } else { "ignored" })
        }
        Event::ControllerStart { provider } => {
            let node = machine.node(provider)?;
            let before = orchestrator.clock().total();
            orchestrator.controller_start(&mut machine.tree, node, || ());
            let slept = orchestrator.clock().total().saturating_sub(before);
            format!("controller start {provider}: slept {} ms", slept.as_millis())
        }
        Event::PinConfig { codec, config_device } => {
            let codec_node = machine.node(codec)?;
            match config_device {
                Some(device) => {
                    let device = machine.node(device)?;
                    orchestrator.initialize_pin_config(&mut machine.tree, codec_node, device, || ());
                }
                None => orchestrator.initialize_pin_config_legacy(&mut machine.tree, codec_node, || ()),
            }
            format!("pin config {codec}")
        }
        Event::PowerChange { driver, from, to } => {
            let node = machine.node(driver)?;
            let woke = Cell::new(false);
            orchestrator.power_change(
                &mut machine.tree,
                node,
                (*from, *to),
                || (),
                |_| {
                    woke.set(true);
                    0
                },
            );
            let suffix = if woke.get() { ", wake verbs re-sent" } else { "" };
            format!("power change {driver}: {from} -> {to}{suffix}")
        }
        Event::Resource { kind, status, data } => {
            let original = ResourceLoad {
                status: *status,
                data: data.as_deref().map(|hex| decode_hex("resource", hex)).transpose()?,
            };
            let result = match kind {
                ResourceKind::Layout => orchestrator.layout_load(original.clone(), |result| result),
                ResourceKind::Platform => orchestrator.platform_load(original.clone(), |result| result),
            };
            if result == original {
                format!("{kind} resource: passed through")
            } else {
                let size = result.data.as_ref().map_or(0, Vec::len);
                format!("{kind} resource: substituted {size} bytes")
            }
        }
        Event::PlatformDriverStart { driver } => {
            let node = machine.node(driver)?;
            orchestrator.platform_driver_start(&mut machine.tree, node, || ());
            format!("platform driver start {driver}")
        }
        Event::HdaDriverStart { driver } => {
            let node = machine.node(driver)?;
            orchestrator.hda_driver_start(&mut machine.tree, node, || ());
            format!("hda driver start {driver}")
        }
        Event::GfxProbe { provider } => {
            let node = machine.node(provider)?;
            let accepted = gfx_probe(&machine.tree, node, || Some(())).is_some();
            format!("gfx probe {provider}: {}", if accepted { "accepted" } else { "refused" })
        }
        Event::Verb { node, verb, param } => {
            execute_verb(*node, *verb, *param, || ());
            describe_verb(*node, *verb, *param)
        }
        Event::Entitlement { name, granted } => {
            if orchestrator.wants_entitlement_hook() {
                let answer = handle_entitlement(name, *granted);
                format!("entitlement {name}: {answer:?}")
            } else {
                format!("entitlement {name}: not hooked")
            }
        }
    })
}

fn decode_hex(context: &str, value: &str) -> Result<Vec<u8>, ScenarioError>
{
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact).map_err(|source| ScenarioError::Hex {
        context: context.to_owned(),
        source,
    })
}
