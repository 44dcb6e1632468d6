//! Controller and codec registries.
//!
//! Both are owned by the orchestrator and only mutated during the discovery
//! phases. Unmatched controllers stay registered but inert; unmatched codecs
//! are removed.

pub mod codec;
pub mod controller;

pub use codec::{CodecInstance, CodecRegistry, ENUMERATION_ATTEMPTS};
pub use controller::{ControllerInstance, ControllerRegistry};

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::clock::RecordingClock;
    use crate::device::{DeviceInfo, DeviceTree, MemoryTree, PropertyValue};
    use crate::facts::builtin;
    use crate::patcher::NvidiaDeviceIdPool;
    use crate::types::ModelMask;

    fn analog_tree(codec_vendor: u32) -> (MemoryTree, DeviceInfo)
    {
        let mut tree = MemoryTree::new();
        let hdef = tree.add_root("HDEF");
        tree.set_property(hdef, "vendor-id", PropertyValue::data_u32(0x8086));
        tree.set_property(hdef, "device-id", PropertyValue::data_u32(0x293E));
        tree.set_property(hdef, "revision-id", PropertyValue::data_u32(0x03));
        tree.set_property(hdef, "alc-layout-id", PropertyValue::data_u32(1));
        let controller = tree.add_child(hdef, "AppleHDAController");
        let codec = tree.add_child(controller, "IOHDACodecDevice");
        tree.set_property(codec, "IOHDACodecVendorID", PropertyValue::Number(u64::from(codec_vendor)));
        tree.set_property(codec, "IOHDACodecRevisionID", PropertyValue::Number(0x10_0001));
        let info = DeviceInfo {
            audio_builtin_analog: Some(hdef),
            ..DeviceInfo::default()
        };
        (tree, info)
    }

    #[test]
    fn test_analog_controller_is_discovered_and_matched()
    {
        let (tree, info) = analog_tree(0x10EC_0892);
        let mut pool = NvidiaDeviceIdPool::default();
        let mut controllers = ControllerRegistry::new();
        controllers.discover(&info, &tree, &mut pool);
        controllers.match_all(builtin::table(), ModelMask::DESKTOP, &mut pool);

        assert_eq!(controllers.len(), 1);
        let analog = controllers.get(0).unwrap();
        assert_eq!(analog.layout, 1);
        assert!(analog.info.is_some());
        assert!(!analog.patches.is_empty());
    }

    #[test]
    fn test_analog_without_layout_is_skipped()
    {
        let (mut tree, info) = analog_tree(0x10EC_0892);
        let hdef = info.audio_builtin_analog.unwrap();
        tree.remove_property(hdef, "alc-layout-id");
        let mut controllers = ControllerRegistry::new();
        controllers.discover(&info, &tree, &mut NvidiaDeviceIdPool::default());
        assert!(controllers.is_empty());
    }

    #[test]
    fn test_unsupported_codecs_are_removed()
    {
        let (tree, info) = analog_tree(0x10EC_0999);
        let mut pool = NvidiaDeviceIdPool::default();
        let mut controllers = ControllerRegistry::new();
        controllers.discover(&info, &tree, &mut pool);

        let mut codecs = CodecRegistry::new();
        let mut clock = RecordingClock::default();
        assert_eq!(codecs.enumerate(&controllers, &tree, &mut clock), 1);
        assert!(!codecs.validate(builtin::table()));
        assert!(codecs.is_empty());
        assert!(clock.sleeps.is_empty());
    }

    #[test]
    fn test_missing_codec_retries_with_settle_delay()
    {
        let (mut tree, info) = analog_tree(0x10EC_0892);
        let codec = tree.find("IOHDACodecDevice").unwrap();
        tree.remove_property(codec, "IOHDACodecVendorID");
        let mut controllers = ControllerRegistry::new();
        controllers.discover(&info, &tree, &mut NvidiaDeviceIdPool::default());

        let mut codecs = CodecRegistry::new();
        let mut clock = RecordingClock::default();
        assert_eq!(codecs.enumerate(&controllers, &tree, &mut clock), 0);
        assert_eq!(clock.sleeps.len(), ENUMERATION_ATTEMPTS - 1);
    }
}
