//! # Device Property Injection
//!
//! Makes the audio and graphics functions look the way the stock drivers
//! expect: `HDEF`/`HDAU` names, a layout id, a stable `hda-gfx` port tag
//! shared between a GPU and its audio function, the `built-in` marker and
//! NVIDIA connector types.
//!
//! Properties that already carry data are left alone unless a boot-argument
//! override says otherwise, so running injection twice changes nothing.

use tracing::{debug, error, info};

use crate::config::BootArgs;
use crate::device::{
    display_name, injection_allowed, u32_property, DeviceInfo, DeviceTree, FirmwareVendor, NodeId, PropertyValue,
};
use crate::types::vendor;

/// Traffic Class Select register in PCI configuration space.
pub const TCSEL_REGISTER: u8 = 0x44;

/// Connector slots probed on NVIDIA GPUs.
pub const MAX_CONNECTORS: usize = 6;

const CONNECTOR_TYPE_DP: [u8; 4] = [0x00, 0x08, 0x00, 0x00];
const BOOT_BEEP_VOLUME: u8 = 0x7F;

/// Decisions taken during injection that later stages depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectionOutcome
{
    /// Codec verb logging was requested.
    pub verbs_enabled: bool,
    /// Controller-start delay support was requested.
    pub delay_enabled: bool,
    /// Layout id reported to the OS when it replaced the node's own value.
    pub layout_override: Option<u32>,
}

/// Port tag of the `n`th HDMI/DP audio port.
#[must_use]
pub fn port_tag(n: u32) -> String
{
    format!("onboard-{n}")
}

/// Inject properties for every audio and graphics function in `info`.
pub fn inject<T: DeviceTree + ?Sized>(info: &DeviceInfo, tree: &mut T, args: &BootArgs) -> InjectionOutcome
{
    let mut outcome = InjectionOutcome::default();
    let builtin_digital = info.has_builtin_digital_audio(&*tree);

    if let Some(hdau) = info.audio_builtin_digital.filter(|node| injection_allowed(&*tree, *node)) {
        if builtin_digital {
            update_device_properties(tree, hdau, info, args, Some(&port_tag(1)), false, &mut outcome);
        } else if tree.terminate(hdau) {
            info!("terminated built-in digital audio on a connector-less framebuffer");
        } else {
            error!("failed to terminate built-in digital audio");
        }
    }

    if let Some(hdef) = info.audio_builtin_analog.filter(|node| injection_allowed(&*tree, *node)) {
        if u32_property(&*tree, hdef, "vendor-id") == Some(vendor::INTEL) {
            update_tcsel(tree, hdef, args);
        }
        let hda_gfx = (builtin_digital && info.audio_builtin_digital.is_none()).then(|| port_tag(1));
        update_device_properties(tree, hdef, info, args, hda_gfx.as_deref(), true, &mut outcome);
    }

    if builtin_digital {
        if let Some(igpu) = info.video_builtin.filter(|node| injection_allowed(&*tree, *node)) {
            tree.set_property(igpu, "hda-gfx", PropertyValue::c_string(&port_tag(1)));
        }
    }

    let mut port = if builtin_digital || info.audio_builtin_analog.is_some() { 2 } else { 1 };
    for gpu in &info.video_external {
        let Some(audio) = gpu.audio.filter(|node| injection_allowed(&*tree, *node)) else {
            continue;
        };
        let tag = port_tag(port);
        port += 1;
        update_device_properties(tree, audio, info, args, Some(&tag), false, &mut outcome);
        tree.set_property(gpu.video, "hda-gfx", PropertyValue::c_string(&tag));

        if gpu.vendor == vendor::NVIDIA && !tree.has_property(gpu.video, "no-audio-fixconn") {
            fix_connector_types(tree, gpu.video);
        }
    }

    let audio_nodes: Vec<NodeId> = info
        .audio_builtin_analog
        .into_iter()
        .chain(info.video_external.iter().filter_map(|gpu| gpu.audio))
        .collect();
    let requested = |key: &str| audio_nodes.iter().any(|node| tree.has_property(*node, key));

    outcome.verbs_enabled = args.verbs_requested().unwrap_or_else(|| requested("alc-verbs"));
    outcome.delay_enabled = args.delay_requested().unwrap_or_else(|| requested("alc-delay"));

    if !outcome.verbs_enabled {
        debug!("no verb support requested, disabling");
    }
    if outcome.delay_enabled {
        debug!("has delay support requested, enabling");
    }
    outcome
}

fn update_tcsel<T: DeviceTree + ?Sized>(tree: &mut T, hdef: NodeId, args: &BootArgs)
{
    let requested = args
        .tcsel_requested()
        .or_else(|| u32_property(&*tree, hdef, "alctcsel").map(|value| value != 0))
        .unwrap_or(false);
    if !requested {
        debug!("disabling TCSEL update");
        return;
    }
    let Some(value) = tree.config_read8(hdef, TCSEL_REGISTER) else {
        error!("cannot access HDEF pci");
        return;
    };
    debug!("updating TCSEL register {value:X}");
    // TC0: bits 2:0 cleared.
    if !tree.config_write8(hdef, TCSEL_REGISTER, value & 0xF8) {
        error!("failed to write TCSEL register");
    }
}

fn fix_connector_types<T: DeviceTree + ?Sized>(tree: &mut T, gpu: NodeId)
{
    for slot in 0..MAX_CONNECTORS {
        let key = format!("@{slot},connector-type");
        if tree.has_property(gpu, &key) {
            debug!("found existing {key} in gpu");
            break;
        }
        debug!("fixing {key} in gpu");
        tree.set_property(gpu, &key, PropertyValue::Data(CONNECTOR_TYPE_DP.to_vec()));
    }
}

fn set_if_absent<T: DeviceTree + ?Sized>(tree: &mut T, node: NodeId, key: &str, value: PropertyValue)
{
    if tree.has_property(node, key) {
        debug!("found existing {key}");
    } else {
        debug!("fixing {key} in {}", display_name(&*tree, node));
        tree.set_property(node, key, value);
    }
}

fn update_device_properties<T: DeviceTree + ?Sized>(
    tree: &mut T,
    node: NodeId,
    info: &DeviceInfo,
    args: &BootArgs,
    hda_gfx: Option<&str>,
    analog: bool,
    outcome: &mut InjectionOutcome,
)
{
    // AppleHDAController only recognises HDEF and HDAU.
    let plane_name = if analog { "HDEF" } else { "HDAU" };
    if tree.name(node) != Some(plane_name) {
        debug!("fixing audio plane name to {plane_name}");
        tree.rename(node, plane_name);
    }

    if analog {
        update_alc_layout(tree, node, info, args);
        set_if_absent(tree, node, "MaximumBootBeepVolume", PropertyValue::Data(vec![BOOT_BEEP_VOLUME]));
        set_if_absent(tree, node, "MaximumBootBeepVolumeAlt", PropertyValue::Data(vec![BOOT_BEEP_VOLUME]));
        set_if_absent(tree, node, "PinConfigurations", PropertyValue::Data(vec![0]));
    }

    if info.firmware_vendor != FirmwareVendor::Apple || tree.has_property(node, "use-apple-layout-id") {
        tree.set_property(node, "layout-id", PropertyValue::data_u32(info.reported_layout_id));
        outcome.layout_override = Some(info.reported_layout_id);
    }

    if let Some(tag) = hda_gfx {
        tree.set_property(node, "hda-gfx", PropertyValue::c_string(tag));
    }

    set_if_absent(tree, node, "built-in", PropertyValue::Data(vec![0]));
}

/// `alc-layout-id`: boot override, then an existing value, then the legacy `layout-id`.
fn update_alc_layout<T: DeviceTree + ?Sized>(tree: &mut T, node: NodeId, info: &DeviceInfo, args: &BootArgs)
{
    if let Some(layout) = args.layout_id {
        debug!("found alc-layout-id override {layout}");
        tree.set_property(node, "alc-layout-id", PropertyValue::data_u32(layout));
        return;
    }
    if let Some(existing) = u32_property(&*tree, node, "alc-layout-id") {
        debug!("found existing alc-layout-id {existing} property");
        return;
    }
    if info.firmware_vendor != FirmwareVendor::Apple || tree.has_property(node, "use-layout-id") {
        match u32_property(&*tree, node, "layout-id") {
            Some(legacy) => {
                debug!("found legacy layout-id {legacy} property");
                tree.set_property(node, "alc-layout-id", PropertyValue::data_u32(legacy));
            }
            None => error!("no layout-id property found in configuration"),
        }
    }
}
