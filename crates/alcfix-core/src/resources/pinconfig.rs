//! Pin-configuration rewrite and wake-verb restore.
//!
//! When a codec initializes its pin defaults the matching `HDAConfigDefault`
//! entry is copied onto the config device with the layout id the OS expects.
//! Entries with `WakeVerbReinit` additionally get a wake copy on the codec
//! itself, which is re-sent after every sleep cycle.
//!
//! State lives on the codec node as two boolean properties:
//! `alc-pinconfig-status` (wake copy installed) and `alc-sleep-status`
//! (the codec went to sleep since the last restore).

use tracing::{debug, error};

use crate::device::{bool_property, display_name, find_ancestor, u32_property, DeviceTree, NodeId, PropertyValue};
use crate::registry::{CodecRegistry, ControllerRegistry};

/// Set once pin configuration handled a codec; `true` when the wake copy exists.
pub const PIN_STATUS_KEY: &str = "alc-pinconfig-status";
/// Set while the codec sleeps.
pub const SLEEP_STATUS_KEY: &str = "alc-sleep-status";
/// Pin configuration list key.
pub const CONFIG_DEFAULT_KEY: &str = "HDAConfigDefault";

/// Audio device power states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState
{
    /// Powered down.
    Sleep = 0,
    /// Powered, not streaming.
    Idle = 1,
    /// Streaming.
    Active = 2,
}

impl PowerState
{
    /// Decode a raw driver power state.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self>
    {
        match raw {
            0 => Some(PowerState::Sleep),
            1 => Some(PowerState::Idle),
            2 => Some(PowerState::Active),
            _ => None,
        }
    }
}

/// What pin configuration did for one codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinConfigOutcome
{
    /// The codec was handled before.
    AlreadyHandled,
    /// Layout or analog codec unknown, only the status flags were set.
    Skipped,
    /// No configuration entry for the analog codec and layout.
    NotFound,
    /// The config device received the entry; `wake` when a wake copy was installed too.
    Written
    {
        /// Wake copy installed on the codec.
        wake: bool,
    },
}

/// What a power transition requires from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction
{
    /// Nothing to do.
    None,
    /// The codec was marked as sleeping.
    MarkedSleep,
    /// Wake verbs must be re-sent, then [`finish_wake`] called.
    ForceWake,
}

/// Layout id of the nearest `HDEF`/`HDAU` above `codec`, 0 when unknown.
pub fn apple_layout<T: DeviceTree + ?Sized>(tree: &T, codec: NodeId) -> u32
{
    let Some(controller) = find_ancestor(tree, codec, &["HDEF", "HDAU"]) else {
        return 0;
    };
    u32_property(tree, controller, "layout-id").unwrap_or_else(|| {
        error!("failed to obtain layout-id from {}", display_name(tree, controller));
        0
    })
}

/// `(codec id, layout)` of the first codec whose controller has a layout.
#[must_use]
pub fn analog_codec(controllers: &ControllerRegistry, codecs: &CodecRegistry) -> Option<(u32, u32)>
{
    codecs.iter().find_map(|codec| {
        let layout = controllers.get(codec.controller)?.layout;
        (layout > 0).then(|| (codec.codec_id(), layout))
    })
}

fn entry_matches(entry: &PropertyValue, codec_id: u32, layout: u32) -> bool
{
    let Some(dict) = entry.as_dict() else {
        error!("invalid {CONFIG_DEFAULT_KEY} entry, pinconfigs are broken");
        return false;
    };
    let codec = dict.get("CodecID").and_then(PropertyValue::as_u32);
    let current = dict.get("LayoutID").and_then(PropertyValue::as_u32);
    codec == Some(codec_id) && current == Some(layout)
}

/// Rewrite pin configuration for `codec`, writing the boot copy to `config_device`.
///
/// `configs` is the plug-in's own `HDAConfigDefault` list, `analog` the
/// result of [`analog_codec`].
pub fn patch_pin_config<T: DeviceTree + ?Sized>(
    tree: &mut T,
    codec: NodeId,
    config_device: NodeId,
    configs: &[PropertyValue],
    analog: Option<(u32, u32)>,
) -> PinConfigOutcome
{
    if tree.has_property(codec, PIN_STATUS_KEY) {
        return PinConfigOutcome::AlreadyHandled;
    }

    let apple = apple_layout(&*tree, codec);
    debug!(
        "initializePinConfig {} config {} apple layout {apple} analog {analog:?}",
        display_name(&*tree, codec),
        display_name(&*tree, config_device)
    );

    tree.set_property(codec, PIN_STATUS_KEY, PropertyValue::Bool(false));
    tree.set_property(codec, SLEEP_STATUS_KEY, PropertyValue::Bool(false));

    let Some((codec_id, layout)) = analog.filter(|_| apple != 0) else {
        return PinConfigOutcome::Skipped;
    };

    debug!("discovered {CONFIG_DEFAULT_KEY} with {} entries", configs.len());
    let Some(entry) = configs
        .iter()
        .find(|entry| entry_matches(entry, codec_id, layout))
        .and_then(PropertyValue::as_dict)
    else {
        return PinConfigOutcome::NotFound;
    };

    let reinit = entry.get("WakeVerbReinit").and_then(PropertyValue::as_bool).unwrap_or(false);
    debug!(
        "current config entry has boot {}, wake {}, reinit {reinit}",
        entry.contains_key("ConfigData"),
        entry.contains_key("WakeConfigData")
    );

    let mut boot = entry.clone();
    boot.insert("LayoutID".to_owned(), PropertyValue::Number(u64::from(apple)));
    tree.set_property(config_device, CONFIG_DEFAULT_KEY, PropertyValue::Array(vec![PropertyValue::Dict(boot.clone())]));

    if !reinit {
        return PinConfigOutcome::Written { wake: false };
    }

    let mut wake = boot;
    if let Some(wake_data) = wake.remove("WakeConfigData") {
        if let Some(config_data) = wake.remove("ConfigData") {
            wake.insert("BootConfigData".to_owned(), config_data);
        }
        wake.insert("ConfigData".to_owned(), wake_data);
    }
    tree.set_property(codec, CONFIG_DEFAULT_KEY, PropertyValue::Array(vec![PropertyValue::Dict(wake)]));
    tree.set_property(codec, PIN_STATUS_KEY, PropertyValue::Bool(true));
    PinConfigOutcome::Written { wake: true }
}

/// Track a power transition of the driver below `codec`.
pub fn power_transition<T: DeviceTree + ?Sized>(tree: &mut T, codec: NodeId, from: u32, to: u32) -> PowerAction
{
    let pin = bool_property(&*tree, codec, PIN_STATUS_KEY);
    let sleep = bool_property(&*tree, codec, SLEEP_STATUS_KEY);
    let (Some(pin), Some(sleep)) = (pin, sleep) else {
        error!("power change failed to get pin {} sleep {}", pin.is_some(), sleep.is_some());
        return PowerAction::None;
    };
    debug!("power change at {} from {from} to {to} pin {pin} sleep {sleep}", display_name(&*tree, codec));

    if !pin {
        return PowerAction::None;
    }
    match PowerState::from_raw(to) {
        Some(PowerState::Sleep) => {
            tree.set_property(codec, SLEEP_STATUS_KEY, PropertyValue::Bool(true));
            PowerAction::MarkedSleep
        }
        Some(PowerState::Idle | PowerState::Active) if sleep => PowerAction::ForceWake,
        _ => PowerAction::None,
    }
}

/// Clear the sleep flag after wake verbs were re-sent.
pub fn finish_wake<T: DeviceTree + ?Sized>(tree: &mut T, codec: NodeId)
{
    tree.set_property(codec, SLEEP_STATUS_KEY, PropertyValue::Bool(false));
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::device::{MemoryTree, PropertyDict};

    fn config(reinit: bool) -> PropertyValue
    {
        let mut dict = PropertyDict::new();
        dict.insert("CodecID".to_owned(), PropertyValue::Number(0x10EC_0892));
        dict.insert("LayoutID".to_owned(), PropertyValue::Number(1));
        dict.insert("ConfigData".to_owned(), PropertyValue::Data(vec![1, 2]));
        dict.insert("WakeConfigData".to_owned(), PropertyValue::Data(vec![3, 4]));
        dict.insert("WakeVerbReinit".to_owned(), PropertyValue::Bool(reinit));
        PropertyValue::Dict(dict)
    }

    fn tree() -> (MemoryTree, NodeId, NodeId)
    {
        let mut tree = MemoryTree::new();
        let hdef = tree.add_root("HDEF");
        tree.set_property(hdef, "layout-id", PropertyValue::data_u32(12));
        let controller = tree.add_child(hdef, "AppleHDAController");
        let codec = tree.add_child(controller, "IOHDACodecDevice");
        (tree, controller, codec)
    }

    fn first_dict(value: Option<&PropertyValue>) -> PropertyDict
    {
        value.and_then(PropertyValue::as_array).unwrap()[0].as_dict().unwrap().clone()
    }

    #[test]
    fn test_boot_and_wake_copies()
    {
        let (mut tree, controller, codec) = tree();
        let outcome = patch_pin_config(&mut tree, codec, controller, &[config(true)], Some((0x10EC_0892, 1)));
        assert_eq!(outcome, PinConfigOutcome::Written { wake: true });

        let boot = first_dict(tree.property(controller, CONFIG_DEFAULT_KEY));
        assert_eq!(boot.get("LayoutID"), Some(&PropertyValue::Number(12)));
        assert_eq!(boot.get("ConfigData"), Some(&PropertyValue::Data(vec![1, 2])));

        let wake = first_dict(tree.property(codec, CONFIG_DEFAULT_KEY));
        assert_eq!(wake.get("ConfigData"), Some(&PropertyValue::Data(vec![3, 4])));
        assert_eq!(wake.get("BootConfigData"), Some(&PropertyValue::Data(vec![1, 2])));
        assert!(!wake.contains_key("WakeConfigData"));
        assert_eq!(tree.property(codec, PIN_STATUS_KEY), Some(&PropertyValue::Bool(true)));

        let again = patch_pin_config(&mut tree, codec, controller, &[config(true)], Some((0x10EC_0892, 1)));
        assert_eq!(again, PinConfigOutcome::AlreadyHandled);
    }

    #[test]
    fn test_without_reinit_only_boot_copy()
    {
        let (mut tree, controller, codec) = tree();
        let outcome = patch_pin_config(&mut tree, codec, controller, &[config(false)], Some((0x10EC_0892, 1)));
        assert_eq!(outcome, PinConfigOutcome::Written { wake: false });
        assert!(tree.property(codec, CONFIG_DEFAULT_KEY).is_none());
        assert_eq!(tree.property(codec, PIN_STATUS_KEY), Some(&PropertyValue::Bool(false)));
    }

    #[test]
    fn test_sleep_then_wake_requests_restore()
    {
        let (mut tree, controller, codec) = tree();
        patch_pin_config(&mut tree, codec, controller, &[config(true)], Some((0x10EC_0892, 1)));

        assert_eq!(power_transition(&mut tree, codec, 2, 0), PowerAction::MarkedSleep);
        assert_eq!(power_transition(&mut tree, codec, 0, 2), PowerAction::ForceWake);
        finish_wake(&mut tree, codec);
        assert_eq!(power_transition(&mut tree, codec, 1, 2), PowerAction::None);
    }

    #[test]
    fn test_power_change_without_flags_is_ignored()
    {
        let (mut tree, _, codec) = tree();
        assert_eq!(power_transition(&mut tree, codec, 2, 0), PowerAction::None);
        assert!(tree.property(codec, SLEEP_STATUS_KEY).is_none());
    }

    #[test]
    fn test_status_tags_must_be_booleans()
    {
        let (mut tree, _, codec) = tree();
        tree.set_property(codec, PIN_STATUS_KEY, PropertyValue::data_u32(1));
        tree.set_property(codec, SLEEP_STATUS_KEY, PropertyValue::Bool(false));
        assert_eq!(power_transition(&mut tree, codec, 2, 0), PowerAction::None);
        assert_eq!(tree.property(codec, SLEEP_STATUS_KEY), Some(&PropertyValue::Bool(false)));
    }
}
