//! # alcfix-core
//!
//! Hardware-matching and patching engine for HDA audio drivers.
//!
//! The crate reacts to driver modules as the host loads them. It finds the
//! audio controllers and codecs present on the machine, matches them against
//! a compiled-in fact table and, per loaded module:
//! - applies the matched byte patches
//! - intercepts driver routines to substitute layout and platform resources
//! - rewrites pin configuration and restores it after sleep
//!
//! Before any module loads, [`Orchestrator::update_properties`] injects the
//! device properties the stock drivers expect.
//!
//! ## Host capabilities
//!
//! Everything outside the engine is reached through traits:
//! [`device::DeviceTree`] for the hardware description,
//! [`patcher::PatchSubstrate`] for binary patching,
//! [`resources::Decompressor`] and [`resources::TreeParser`] for resource
//! containers and [`clock::Clock`] for delays. In-memory implementations of
//! each ship with the crate and back the test-suite and the replay tool.

pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod facts;
pub mod inject;
pub mod orchestrator;
pub mod patcher;
pub mod prelude;
pub mod progress;
pub mod registry;
pub mod resources;
pub mod types;

pub use error::{AlcError, AlcResult};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
