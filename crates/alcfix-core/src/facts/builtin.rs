//! Built-in fact table.
//!
//! Entries are listed in priority order. Specific revisions come before the
//! general fallback for the same device.

use once_cell::sync::Lazy;

use super::{
    CodecModInfo, ControllerModInfo, FactTable, ModuleId, ModulePatch, ResourceFile, VendorModInfo,
    NVIDIA_SENTINEL_FIND,
};
use crate::types::{vendor, KernelVersion, ModelMask, Platform, VersionRange};

/// NVIDIA HDA device ids `AppleHDAController` recognises natively.
///
/// Each discrete NVIDIA audio function borrows one of these slots: the first
/// unused id is rewritten to the function's real id.
pub const NVIDIA_POOL_IDS: [u32; 19] = [
    pool_id(0x0BE2),
    pool_id(0x0BE3),
    pool_id(0x0BE4),
    pool_id(0x0BE5),
    pool_id(0x0BE9),
    pool_id(0x0BEA),
    pool_id(0x0BEB),
    pool_id(0x0BEC),
    pool_id(0x0BED),
    pool_id(0x0BEE),
    pool_id(0x0E08),
    pool_id(0x0E09),
    pool_id(0x0E0A),
    pool_id(0x0E0B),
    pool_id(0x0E0C),
    pool_id(0x0E0F),
    pool_id(0x0E12),
    pool_id(0x0E1A),
    pool_id(0x0E1B),
];

const fn pool_id(device: u32) -> u32
{
    (device << 16) | vendor::NVIDIA
}

/// The plug-in's own `HDAConfigDefault` list.
pub const PIN_CONFIGS: &[u8] = include_bytes!("../../resources/pinconfigs.plist");

const LAYOUT_892_1: &[u8] = include_bytes!("../../resources/layout892_1.plist");
const PLATFORMS_892: &[u8] = include_bytes!("../../resources/platforms892.plist");
const LAYOUT_269_3: &[u8] = include_bytes!("../../resources/layout269_3.plist");
const PLATFORMS_269: &[u8] = include_bytes!("../../resources/platforms269.plist");

static TABLE: Lazy<FactTable> = Lazy::new(build);

/// The process-wide built-in table.
#[must_use]
pub fn table() -> &'static FactTable
{
    &TABLE
}

fn controller_id_patch(supported: u32, actual: u32) -> ModulePatch
{
    ModulePatch::new(ModuleId::AppleHDAController, &supported.to_le_bytes(), &actual.to_le_bytes())
}

fn nvidia_controller(name: &str, device: u32) -> ControllerModInfo
{
    ControllerModInfo {
        name: name.to_owned(),
        vendor: vendor::NVIDIA,
        device,
        revisions: Default::default(),
        platform: Platform::Any,
        models: ModelMask::ANY,
        patches: vec![ModulePatch::new(
            ModuleId::AppleHDAController,
            &NVIDIA_SENTINEL_FIND.to_le_bytes(),
            &pool_id(device).to_le_bytes(),
        )
        .with_count(1)],
    }
}

fn intel_controller(name: &str, device: u32, patches: Vec<ModulePatch>) -> ControllerModInfo
{
    ControllerModInfo {
        name: name.to_owned(),
        vendor: vendor::INTEL,
        device,
        revisions: Default::default(),
        platform: Platform::Any,
        models: ModelMask::ANY,
        patches,
    }
}

fn codec_id_patch(supported: u32, actual: u32) -> ModulePatch
{
    ModulePatch::new(ModuleId::AppleHDA, &supported.to_le_bytes(), &actual.to_le_bytes())
}

fn resource(layout: u32, data: &[u8]) -> ResourceFile
{
    ResourceFile {
        layout,
        versions: VersionRange::ANY,
        data: data.to_vec(),
    }
}

fn build() -> FactTable
{
    // ICH10 is the id AppleHDAController already knows.
    let ich10 = (0x3A3E << 16) | vendor::INTEL;

    let mut ich9_laptop = intel_controller(
        "ICH9 (mobile)",
        0x293E,
        vec![controller_id_patch(ich10, (0x293E << 16) | vendor::INTEL)],
    );
    ich9_laptop.revisions = [0x03].into_iter().collect();
    ich9_laptop.models = ModelMask::LAPTOP;

    let controllers = vec![
        ich9_laptop,
        intel_controller(
            "ICH9",
            0x293E,
            vec![controller_id_patch(ich10, (0x293E << 16) | vendor::INTEL)],
        ),
        intel_controller(
            "Series 100 HD Audio",
            0xA170,
            vec![
                controller_id_patch(ich10, (0xA170 << 16) | vendor::INTEL)
                    .with_versions(VersionRange::until(KernelVersion::HIGH_SIERRA)),
            ],
        ),
        intel_controller("Haswell HDMI Audio", 0x0C0C, Vec::new()),
        nvidia_controller("GP104 HDMI Audio", 0x10F0),
        nvidia_controller("GP106 HDMI Audio", 0x10F1),
        nvidia_controller("TU104 HDMI Audio", 0x10F8),
        nvidia_controller("TU106 HDMI Audio", 0x10F9),
    ];

    let alc885 = (0x10EC << 16) | 0x0885;
    let realtek = VendorModInfo {
        name: "Realtek".to_owned(),
        vendor: vendor::REALTEK,
        codecs: vec![
            CodecModInfo {
                name: "ALC892".to_owned(),
                codec: 0x0892,
                revisions: Default::default(),
                patches: vec![codec_id_patch(alc885, (0x10EC << 16) | 0x0892)],
                platforms: vec![resource(1, PLATFORMS_892)],
                layouts: vec![resource(1, LAYOUT_892_1)],
            },
            CodecModInfo {
                name: "ALC269".to_owned(),
                codec: 0x0269,
                revisions: Default::default(),
                patches: vec![codec_id_patch(alc885, (0x10EC << 16) | 0x0269)],
                platforms: vec![resource(3, PLATFORMS_269)],
                layouts: vec![resource(3, LAYOUT_269_3)],
            },
            CodecModInfo {
                name: "ALC887-VD".to_owned(),
                codec: 0x0887,
                revisions: [0x10_0302].into_iter().collect(),
                patches: vec![codec_id_patch(alc885, (0x10EC << 16) | 0x0887)],
                platforms: Vec::new(),
                layouts: Vec::new(),
            },
        ],
    };

    let conexant = VendorModInfo {
        name: "Conexant".to_owned(),
        vendor: vendor::CONEXANT,
        codecs: vec![CodecModInfo {
            name: "CX20590".to_owned(),
            codec: 0x506E,
            revisions: Default::default(),
            patches: Vec::new(),
            platforms: Vec::new(),
            layouts: Vec::new(),
        }],
    };

    FactTable {
        controllers,
        vendors: vec![realtek, conexant],
    }
}
