//! Common module for library exports

pub use crate::clock::{Clock, RecordingClock, SystemClock};
pub use crate::config::BootArgs;
pub use crate::device::{DeviceInfo, DeviceTree, ExternalGpu, FirmwareVendor, MemoryTree, NodeId, PropertyValue};
pub use crate::error::{AlcError, AlcResult};
pub use crate::facts::{FactTable, ModuleId, ResourceKind};
pub use crate::inject::InjectionOutcome;
pub use crate::orchestrator::{Orchestrator, OrchestratorBuilder};
pub use crate::patcher::{HookKind, ImageSubstrate, PatchSubstrate};
pub use crate::progress::{Progress, ProgressState};
pub use crate::resources::{ResourceLoad, StoredDecompressor};
pub use crate::types::{Address, KernelVersion, ModelMask};
