//! # Types
//!
//! Small value types shared by every layer of the engine: addresses inside
//! loaded modules, hardware identities used as lookup keys, and kernel
//! version ranges used to decide whether a patch or resource applies.

pub mod address;
pub mod hardware;
pub mod version;

// Re-export all public types
pub use address::Address;
pub use hardware::{join_codec_id, split_codec_id, vendor, HardwareKey, ModelMask, Platform};
pub use version::{KernelVersion, VersionRange};
