//! Properties that must hold for any input

mod common;

use std::collections::HashSet;

use alcfix_core::device::{DeviceTree, PropertyDict, PropertyValue};
use alcfix_core::facts::{builtin, ControllerModInfo, FactTable};
use alcfix_core::inject::inject;
use alcfix_core::orchestrator::{clamp_start_delay, MAX_START_DELAY_MS};
use alcfix_core::patcher::NvidiaDeviceIdPool;
use alcfix_core::prelude::*;
use alcfix_core::registry::{CodecRegistry, ControllerRegistry};
use alcfix_core::resources::{ResourceSelector, STATUS_SUCCESS};
use alcfix_core::types::{vendor, HardwareKey};
use common::*;

fn snapshot(tree: &MemoryTree) -> Vec<(Option<String>, PropertyDict)>
{
    tree.node_ids()
        .map(|node| {
            (
                tree.name(node).map(str::to_owned),
                tree.properties(node).cloned().unwrap_or_default(),
            )
        })
        .collect()
}

#[test]
fn test_injection_is_idempotent()
{
    let mut machine = analog_machine(ALC892, 1);
    let video = machine.tree.add_root("GFX0");
    let audio = machine.tree.add_child(video, "HDMI");
    machine.tree.set_property(audio, "device-id", PropertyValue::data_u32(0x10F0));
    machine.tree.set_property(audio, "revision-id", PropertyValue::data_u32(0xA1));
    machine.info.video_external.push(ExternalGpu {
        video,
        audio: Some(audio),
        vendor: vendor::NVIDIA,
    });
    let igpu = machine.tree.add_root("IGPU");
    machine.info.video_builtin = Some(igpu);

    for args in ["", "alcid=5 alctcsel=1", "alcverbs=1 alcdelay=100"] {
        let mut tree = machine.tree.clone();
        let args = BootArgs::parse(args);
        let first = inject(&machine.info, &mut tree, &args);
        let before = snapshot(&tree);
        let second = inject(&machine.info, &mut tree, &args);
        assert_eq!(before, snapshot(&tree));
        assert_eq!(first, second);
    }
}

#[test]
fn test_existing_vendor_properties_survive_injection()
{
    let mut machine = analog_machine(ALC892, 1);
    let hdef = machine.hdef;
    machine.tree.set_property(hdef, "built-in", PropertyValue::Data(vec![1]));
    machine.tree.set_property(hdef, "PinConfigurations", PropertyValue::Data(vec![9, 9]));
    machine.tree.set_property(hdef, "alc-layout-id", PropertyValue::data_u32(21));

    inject(&machine.info, &mut machine.tree, &BootArgs::default());

    assert_eq!(machine.tree.property(hdef, "built-in"), Some(&PropertyValue::Data(vec![1])));
    assert_eq!(machine.tree.property(hdef, "PinConfigurations"), Some(&PropertyValue::Data(vec![9, 9])));
    assert_eq!(machine.tree.property(hdef, "alc-layout-id"), Some(&PropertyValue::data_u32(21)));
}

#[test]
fn test_progress_bits_are_monotonic()
{
    let mut machine = analog_machine(ALC892, 1);
    let mut orchestrator = Orchestrator::builder(KernelVersion::CATALINA)
        .boot_args(BootArgs::parse("alcverbs=1 alcdelay=1"))
        .clock(RecordingClock::default())
        .build();
    let mut substrate = substrate(KernelVersion::CATALINA);
    orchestrator.update_properties(&machine.info, &mut machine.tree);

    let sequence = [
        ModuleId::IOHDAFamily,
        ModuleId::AppleHDA,
        ModuleId::AppleGFXHDA,
        ModuleId::AppleHDAController,
        ModuleId::AppleHDA,
        ModuleId::IOHDAFamily,
        ModuleId::AppleHDAController,
    ];
    let mut seen = orchestrator.progress().bits();
    for id in sequence {
        load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, id);
        let now = orchestrator.progress().bits();
        assert!(now.contains(seen), "{id} cleared progress bits");
        seen = now;
    }
    assert!(seen.contains(Progress::PATCH_HDA_FAMILY | Progress::PATCH_HDA_CONTROLLER));
    assert!(substrate.last_error().is_none());
}

#[test]
fn test_hooks_install_once()
{
    let mut machine = analog_machine(ALC892, 1);
    let mut orchestrator = Orchestrator::builder(KernelVersion::CATALINA)
        .boot_args(BootArgs::parse("alcverbs=1"))
        .clock(RecordingClock::default())
        .build();
    let mut substrate = substrate(KernelVersion::CATALINA);
    orchestrator.update_properties(&machine.info, &mut machine.tree);

    for _ in 0..3 {
        load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::IOHDAFamily);
        load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDA);
    }
    let mut symbols: Vec<&str> = substrate.hooks().iter().map(|hook| hook.symbol.as_str()).collect();
    let total = symbols.len();
    symbols.sort_unstable();
    symbols.dedup();
    assert_eq!(total, symbols.len());
    assert_eq!(orchestrator.hooks().iter().count(), total);
}

#[test]
fn test_unknown_layout_passes_resources_through()
{
    // Layout 9 has no resource file for ALC892.
    let mut machine = analog_machine(ALC892, 9);
    let mut orchestrator = Orchestrator::builder(KernelVersion::CATALINA)
        .clock(RecordingClock::default())
        .build();
    let mut substrate = substrate(KernelVersion::CATALINA);
    orchestrator.update_properties(&machine.info, &mut machine.tree);
    load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDAController);
    load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDA);
    assert_eq!(orchestrator.codecs().len(), 1);

    let original = ResourceLoad {
        status: STATUS_SUCCESS,
        data: Some(b"stock layout".to_vec()),
    };
    assert_eq!(orchestrator.layout_load(original.clone(), |result| result), original);
    let failed = ResourceLoad::failed(-7);
    assert_eq!(orchestrator.platform_load(failed.clone(), |result| result), failed);
}

#[test]
fn test_undecodable_resource_passes_through()
{
    let mut facts = builtin::table().clone();
    // Size prefix far above the resource buffer.
    facts.vendors[0].codecs[0].layouts[0].data = vec![0xFF, 0xFF, 0xFF, 0x7F, 1, 2];

    let mut machine = analog_machine(ALC892, 1);
    let mut orchestrator = Orchestrator::builder(KernelVersion::LION)
        .facts(facts)
        .decompressor(alcfix_core::resources::Lz4Decompressor)
        .clock(RecordingClock::default())
        .build();
    let mut substrate = ImageSubstrate::new(KernelVersion::LION);
    let symbols = [(HookKind::LayoutLoad.symbol(), 0x4)];
    substrate.add_raw_image(index_of(ModuleId::AppleHDA), image(&[]), symbols);
    orchestrator.update_properties(&machine.info, &mut machine.tree);
    load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDA);
    assert!(!orchestrator.compressed_consumer());

    let original = ResourceLoad::failed(-3);
    assert_eq!(orchestrator.layout_load(original.clone(), |result| result), original);
}

#[test]
fn test_codec_validation_is_a_filter()
{
    let mut pool = NvidiaDeviceIdPool::default();
    let mut trees = Vec::new();
    for codec in [ALC892, 0x10EC_0999, 0x14F1_506E, 0x1234_5678] {
        let mut machine = analog_machine(codec, 1);
        machine.tree.set_property(machine.hdef, "alc-layout-id", PropertyValue::data_u32(1));
        trees.push(machine);
    }

    let mut survivors = HashSet::new();
    for machine in &trees {
        let mut controllers = ControllerRegistry::new();
        controllers.discover(&machine.info, &machine.tree, &mut pool);
        assert_eq!(controllers.len(), 1);
        let mut codecs = CodecRegistry::new();
        codecs.enumerate(&controllers, &machine.tree, &mut RecordingClock::default());
        let before: HashSet<u32> = codecs.iter().map(|codec| codec.codec_id()).collect();
        codecs.validate(builtin::table());
        for codec in codecs.iter() {
            assert!(codec.info.is_some());
            assert!(before.contains(&codec.codec_id()));
            survivors.insert(codec.codec_id());
        }
    }
    assert_eq!(survivors, HashSet::from([ALC892, 0x14F1_506E]));
}

#[test]
fn test_pool_assignment_is_injective_until_exhausted()
{
    let mut pool = NvidiaDeviceIdPool::default();
    pool.reserve(builtin::NVIDIA_POOL_IDS[3]);
    let mut seen = HashSet::new();
    while let Some(id) = pool.next_free() {
        assert!(seen.insert(id), "{id:08X} handed out twice");
    }
    assert_eq!(seen.len(), builtin::NVIDIA_POOL_IDS.len() - 1);
    assert!(!seen.contains(&builtin::NVIDIA_POOL_IDS[3]));
    assert_eq!(pool.next_free(), None);
}

fn entry(name: &str, device: u32, revisions: &[u32]) -> ControllerModInfo
{
    let mut info = builtin::table().controllers[1].clone();
    info.name = name.to_owned();
    info.device = device;
    info.revisions = revisions.iter().copied().collect();
    info
}

#[test]
fn test_first_match_wins_and_disjoint_order_is_irrelevant()
{
    let specific = entry("specific", 0x1111, &[2]);
    let general = entry("general", 0x1111, &[]);
    let other = entry("other", 0x2222, &[]);

    let forward = FactTable {
        controllers: vec![specific.clone(), general.clone(), other.clone()],
        vendors: Vec::new(),
    };
    let reordered = FactTable {
        controllers: vec![other, specific, general],
        vendors: Vec::new(),
    };

    for (device, revision, expected) in [(0x1111, 2, "specific"), (0x1111, 5, "general"), (0x2222, 2, "other")] {
        let key = HardwareKey::new(vendor::INTEL, device, revision);
        for table in [&forward, &reordered] {
            let matched = table.match_controller(&key, ModelMask::ANY).unwrap();
            assert_eq!(table.controller(matched).unwrap().name, expected);
        }
    }
}

#[test]
fn test_start_delay_ceiling()
{
    assert_eq!(clamp_start_delay(0), 0);
    assert_eq!(clamp_start_delay(MAX_START_DELAY_MS), MAX_START_DELAY_MS);
    assert_eq!(clamp_start_delay(MAX_START_DELAY_MS + 1), 0);
    assert_eq!(clamp_start_delay(5000), 0);
}

#[test]
fn test_selector_without_codecs_selects_nothing()
{
    let controllers = ControllerRegistry::new();
    let codecs = CodecRegistry::new();
    let selector = ResourceSelector {
        facts: builtin::table(),
        controllers: &controllers,
        codecs: &codecs,
        kernel: KernelVersion::CATALINA,
    };
    assert!(selector.select(ResourceKind::Layout).is_none());
}
