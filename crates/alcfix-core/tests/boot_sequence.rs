//! End-to-end boot sequences through the orchestrator

mod common;

use std::cell::Cell;
use std::time::Duration;

use alcfix_core::device::{u32_property, PropertyValue};
use alcfix_core::facts::builtin;
use alcfix_core::patcher::HookKind;
use alcfix_core::prelude::*;
use alcfix_core::registry::codec::SETTLE_DELAY;
use alcfix_core::resources::pinconfig::{CONFIG_DEFAULT_KEY, PIN_STATUS_KEY, SLEEP_STATUS_KEY};
use alcfix_core::types::vendor;
use common::*;

fn contains(haystack: &[u8], needle: &[u8]) -> bool
{
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn orchestrator(args: &str) -> Orchestrator<RecordingClock>
{
    Orchestrator::builder(KernelVersion::CATALINA)
        .boot_args(BootArgs::parse(args))
        .clock(RecordingClock::default())
        .build()
}

#[test]
fn test_analog_controller_matches_general_entry_and_patches_its_module()
{
    let mut machine = analog_machine(ALC892, 1);
    let mut orchestrator = orchestrator("");
    let mut substrate = substrate(KernelVersion::CATALINA);

    orchestrator.update_properties(&machine.info, &mut machine.tree);
    assert!(load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDAController));

    let controller = orchestrator.controllers().get(0).unwrap();
    let entry = orchestrator.facts().controller(controller.info.unwrap()).unwrap();
    assert_eq!(entry.name, "ICH9");
    assert!(entry.revisions.is_empty());

    let image = substrate.image(index_of(ModuleId::AppleHDAController)).unwrap();
    assert!(contains(image, &ICH9.to_le_bytes()));
    assert!(!contains(image, &ICH10.to_le_bytes()));
    assert!(!contains(image, b"Sound as"));

    // Codec patches target AppleHDA only.
    let hda = substrate.image(index_of(ModuleId::AppleHDA)).unwrap();
    assert!(contains(hda, &ALC885.to_le_bytes()));
}

#[test]
fn test_full_analog_boot_routes_resources()
{
    let mut machine = analog_machine(ALC892, 1);
    let mut orchestrator = orchestrator("");
    let mut substrate = substrate(KernelVersion::CATALINA);

    let outcome = orchestrator.update_properties(&machine.info, &mut machine.tree);
    assert_eq!(outcome.layout_override, Some(12));
    assert!(!outcome.verbs_enabled);

    load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDAController);
    load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDA);
    assert!(!load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::IOHDAFamily));

    let progress = orchestrator.progress();
    assert!(progress.is_set(Progress::CONTROLLERS_LOADED | Progress::CODECS_LOADED));
    assert!(progress.is_set(Progress::CALLBACKS_WANT_ROUTING | Progress::ROUTED_HDA_CALLBACKS));
    assert!(progress.is_set(Progress::PATCH_HDA_CONTROLLER));
    assert!(!orchestrator.hooks().is_installed(HookKind::HdaControllerStart));
    for kind in [HookKind::PowerChange, HookKind::PinConfig, HookKind::LayoutLoad, HookKind::PlatformLoad] {
        assert!(orchestrator.hooks().is_installed(kind), "{kind} not routed");
    }
    assert!(!orchestrator.hooks().is_installed(HookKind::ExecuteVerb));
    assert!(orchestrator.compressed_consumer());

    let hda = substrate.image(index_of(ModuleId::AppleHDA)).unwrap();
    assert!(contains(hda, &ALC892.to_le_bytes()));
    assert!(!contains(hda, b"Sound as"));

    let expected = &builtin::table().vendors[0].codecs[0].layouts[0].data;
    let layout = orchestrator.layout_load(ResourceLoad::failed(-1), |result| result);
    assert_eq!(layout, ResourceLoad::success(expected.clone()));
}

#[test]
fn test_pin_config_and_wake_restore()
{
    let mut machine = analog_machine(ALC892, 1);
    let mut orchestrator = orchestrator("");
    let mut substrate = substrate(KernelVersion::CATALINA);
    orchestrator.update_properties(&machine.info, &mut machine.tree);
    load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDAController);
    load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDA);

    let config_device = machine.tree.parent(machine.codec).unwrap();
    let status = orchestrator.initialize_pin_config(&mut machine.tree, machine.codec, config_device, || 0);
    assert_eq!(status, 0);

    let boot = machine.tree.property(config_device, CONFIG_DEFAULT_KEY).and_then(PropertyValue::as_array).unwrap();
    let boot = boot[0].as_dict().unwrap();
    assert_eq!(boot.get("LayoutID"), Some(&PropertyValue::Number(12)));
    assert_eq!(machine.tree.property(machine.codec, PIN_STATUS_KEY), Some(&PropertyValue::Bool(true)));

    let reinits = Cell::new(0);
    let reinit = |_| {
        reinits.set(reinits.get() + 1);
        0
    };
    orchestrator.power_change(&mut machine.tree, machine.driver, (2, 0), || (), reinit);
    assert_eq!(machine.tree.property(machine.codec, SLEEP_STATUS_KEY), Some(&PropertyValue::Bool(true)));
    assert_eq!(reinits.get(), 0);

    orchestrator.power_change(&mut machine.tree, machine.driver, (0, 2), || (), reinit);
    assert_eq!(reinits.get(), 1);
    assert_eq!(machine.tree.property(machine.codec, SLEEP_STATUS_KEY), Some(&PropertyValue::Bool(false)));
}

#[test]
fn test_legacy_platform_driver_receives_layouts()
{
    let mut machine = analog_machine(ALC892, 1);
    let mut orchestrator = Orchestrator::builder(KernelVersion::LEOPARD)
        .clock(RecordingClock::default())
        .build();
    let mut substrate = substrate(KernelVersion::LEOPARD);
    orchestrator.update_properties(&machine.info, &mut machine.tree);
    load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDAController);
    assert!(orchestrator.modules().is_enabled(ModuleId::AppleHDAPlatformDriver));

    let driver = machine.tree.add_root("AppleHDAPlatformDriver");
    orchestrator.platform_driver_start(&mut machine.tree, driver, || ());

    let layouts = machine.tree.property(driver, "Layouts").and_then(PropertyValue::as_array).unwrap();
    assert_eq!(layouts.len(), 1);
    assert_eq!(layouts[0].as_dict().unwrap().get("LayoutID"), Some(&PropertyValue::Number(12)));
    let path_maps = machine.tree.property(driver, "PathMaps").and_then(PropertyValue::as_array).unwrap();
    assert!(!path_maps.is_empty());
    assert!(!machine.tree.has_property(driver, "CodecInfo"));
}

#[test]
fn test_two_nvidia_gpus_get_sequential_ports_and_distinct_pool_ids()
{
    let mut machine = analog_machine(ALC892, 1);
    let mut gpus = Vec::new();
    for (name, device) in [("GFX0", 0x10F0), ("GFX1", 0x10F8)] {
        let video = machine.tree.add_root(name);
        let audio = machine.tree.add_child(video, "HDMI");
        machine.tree.set_property(audio, "device-id", PropertyValue::data_u32(device));
        machine.tree.set_property(audio, "revision-id", PropertyValue::data_u32(0xA1));
        gpus.push(ExternalGpu {
            video,
            audio: Some(audio),
            vendor: vendor::NVIDIA,
        });
    }
    machine.info.video_external = gpus.clone();

    let mut orchestrator = orchestrator("");
    let mut substrate = substrate(KernelVersion::CATALINA);
    orchestrator.update_properties(&machine.info, &mut machine.tree);

    for (gpu, port) in gpus.iter().zip(["onboard-2", "onboard-3"]) {
        let audio = gpu.audio.unwrap();
        assert_eq!(machine.tree.property(audio, "hda-gfx"), Some(&PropertyValue::c_string(port)));
        assert_eq!(machine.tree.property(gpu.video, "hda-gfx"), Some(&PropertyValue::c_string(port)));
        assert_eq!(machine.tree.name(audio), Some("HDAU"));
        assert!(machine.tree.has_property(gpu.video, "@0,connector-type"));
    }

    load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDAController);

    let finds: Vec<Vec<u8>> = orchestrator
        .controllers()
        .iter()
        .filter(|controller| controller.vendor == vendor::NVIDIA)
        .map(|controller| controller.patches[0].find.clone())
        .collect();
    assert_eq!(finds.len(), 2);
    assert_eq!(finds[0], builtin::NVIDIA_POOL_IDS[0].to_le_bytes());
    assert_eq!(finds[1], builtin::NVIDIA_POOL_IDS[1].to_le_bytes());
    assert_ne!(finds[0], finds[1]);
}

#[test]
fn test_external_gpu_follows_builtin_digital_and_analog()
{
    let mut machine = analog_machine(ALC892, 1);
    let igpu = machine.tree.add_root("IGPU");
    let hdau = machine.tree.add_root("HDAU");
    let video = machine.tree.add_root("GFX0");
    let audio = machine.tree.add_child(video, "HDMI");
    machine.info.video_builtin = Some(igpu);
    machine.info.audio_builtin_digital = Some(hdau);
    machine.info.video_external = vec![ExternalGpu {
        video,
        audio: Some(audio),
        vendor: vendor::AMD,
    }];

    let mut orchestrator = orchestrator("");
    orchestrator.update_properties(&machine.info, &mut machine.tree);

    assert_eq!(machine.tree.property(hdau, "hda-gfx"), Some(&PropertyValue::c_string("onboard-1")));
    assert_eq!(machine.tree.property(igpu, "hda-gfx"), Some(&PropertyValue::c_string("onboard-1")));
    assert!(!machine.tree.has_property(machine.hdef, "hda-gfx"));
    assert_eq!(machine.tree.property(audio, "hda-gfx"), Some(&PropertyValue::c_string("onboard-2")));
    assert_eq!(machine.tree.property(video, "hda-gfx"), Some(&PropertyValue::c_string("onboard-2")));
}

#[test]
fn test_oversized_start_delay_is_dropped()
{
    let mut machine = analog_machine(ALC892, 1);
    let mut orchestrator = orchestrator("alcdelay=5000");
    let mut substrate = substrate(KernelVersion::CATALINA);

    let outcome = orchestrator.update_properties(&machine.info, &mut machine.tree);
    assert!(outcome.delay_enabled);
    load(&mut orchestrator, &mut substrate, &machine.tree, &machine.info, ModuleId::AppleHDAController);
    assert!(orchestrator.hooks().is_installed(HookKind::HdaControllerStart));

    let hdef = machine.hdef;
    let started = orchestrator.controller_start(&mut machine.tree, hdef, || true);
    assert!(started);
    assert!(orchestrator.clock().sleeps.is_empty());
    assert_eq!(u32_property(&machine.tree, hdef, "alc-delay"), Some(5000));
}

#[test]
fn test_codec_enumeration_settles_within_one_event()
{
    let mut machine = analog_machine(ALC892, 1);
    machine.tree.set_property(machine.hdef, "alc-layout-id", PropertyValue::data_u32(1));
    let tree = SettlingTree {
        inner: machine.tree,
        hidden: Cell::new(3),
    };
    let mut orchestrator = orchestrator("");
    let mut substrate = substrate(KernelVersion::CATALINA);

    load(&mut orchestrator, &mut substrate, &tree, &machine.info, ModuleId::AppleHDAController);

    assert_eq!(orchestrator.codecs().len(), 1);
    assert_eq!(orchestrator.codecs().get(0).unwrap().codec_id(), ALC892);
    assert!(orchestrator.progress().is_set(Progress::CODECS_LOADED));
    assert_eq!(orchestrator.clock().sleeps, vec![SETTLE_DELAY; 3]);
    assert_eq!(orchestrator.clock().total(), Duration::from_millis(30));
}

#[test]
fn test_codec_enumeration_retries_on_next_codec_bearing_event()
{
    let mut machine = analog_machine(ALC892, 1);
    machine.tree.set_property(machine.hdef, "alc-layout-id", PropertyValue::data_u32(1));
    let tree = SettlingTree {
        inner: machine.tree,
        hidden: Cell::new(4),
    };
    let mut orchestrator = orchestrator("");
    let mut substrate = substrate(KernelVersion::CATALINA);

    load(&mut orchestrator, &mut substrate, &tree, &machine.info, ModuleId::AppleHDAController);
    assert!(orchestrator.codecs().is_empty());
    assert!(!orchestrator.progress().is_set(Progress::CODECS_LOADED));

    // Not codec-bearing: no attempt is made.
    load(&mut orchestrator, &mut substrate, &tree, &machine.info, ModuleId::IOHDAFamily);
    assert!(!orchestrator.progress().is_set(Progress::CODECS_LOADED));

    load(&mut orchestrator, &mut substrate, &tree, &machine.info, ModuleId::AppleHDA);
    assert_eq!(orchestrator.codecs().len(), 1);
    assert!(orchestrator.progress().is_set(Progress::CODECS_LOADED));
}
