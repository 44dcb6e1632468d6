//! Byte-patch application.
//!
//! A patch applies to a module event when its target module matches and its
//! kernel range covers the running kernel. A missing pattern is logged and
//! skipped: one fact-table entry may carry alternatives for several kernels,
//! and only one of them can be present in a given image.

use tracing::{debug, warn};

use super::{ModuleLoad, NvidiaDeviceIdPool, PatchSubstrate};
use crate::error::AlcError;
use crate::facts::{ModuleId, ModulePatch};

/// Assertion-log prefix nulled out in release boots.
pub const LOG_ASSERT_PREFIX: &[u8] = b"Sound as";

/// Apply every patch in `patches` that targets `module`.
///
/// Returns the number of patches that were applied successfully.
pub fn apply_patches<S: PatchSubstrate + ?Sized>(substrate: &mut S, module: &ModuleLoad, patches: &[ModulePatch]) -> usize
{
    let mut applied = 0;
    for (index, patch) in patches.iter().enumerate() {
        if patch.module != module.id {
            continue;
        }
        debug!("checking patch {index} for {}", module.id);
        if !substrate.is_version_in_range(&patch.versions) {
            debug!("patch {index} for {} does not apply to {}", module.id, substrate.kernel_version());
            continue;
        }
        match substrate.apply_lookup_patch(module, patch) {
            Ok(()) => {
                debug!("applied patch {index} for {}", module.id);
                applied += 1;
            }
            Err(err) => debug!("patch {index} for {} skipped: {err}", module.id),
        }
        substrate.clear_error();
    }
    applied
}

/// Null the driver's assertion-log prefix.
///
/// Three occurrences live in `AppleHDAController`, two in `AppleHDA`. Other
/// modules are left alone.
pub fn erase_redundant_logs<S: PatchSubstrate + ?Sized>(substrate: &mut S, module: &ModuleLoad)
{
    let count = match module.id {
        ModuleId::AppleHDAController => 3,
        ModuleId::AppleHDA => 2,
        _ => return,
    };
    let patch = ModulePatch::new(module.id, LOG_ASSERT_PREFIX, &[0; LOG_ASSERT_PREFIX.len()]).with_count(count);
    if let Err(err) = substrate.apply_lookup_patch(module, &patch) {
        debug!("log erasure in {} skipped: {err}", module.id);
    }
    substrate.clear_error();
}

/// Resolve sentinel patches of one controller instance against the pool.
///
/// Each sentinel search pattern is replaced by the next free pool id. When the
/// pool is exhausted the sentinel patch is dropped, since it cannot match
/// anything meaningful.
pub fn substitute_pool_ids(patches: &[ModulePatch], pool: &mut NvidiaDeviceIdPool) -> Vec<ModulePatch>
{
    let mut resolved = Vec::with_capacity(patches.len());
    for patch in patches {
        if !patch.is_nvidia_sentinel() {
            resolved.push(patch.clone());
            continue;
        }
        match pool.next_free() {
            Some(id) => {
                let mut concrete = patch.clone();
                concrete.find = id.to_le_bytes().to_vec();
                resolved.push(concrete);
            }
            None => warn!("{}", AlcError::PoolExhausted(pool.capacity())),
        }
    }
    resolved
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::facts::NVIDIA_SENTINEL_FIND;

    #[test]
    fn test_each_instance_gets_a_distinct_id()
    {
        let mut pool = NvidiaDeviceIdPool::new(&[0x0E08_10DE, 0x0E09_10DE]);
        let sentinel = ModulePatch::new(
            ModuleId::AppleHDAController,
            &NVIDIA_SENTINEL_FIND.to_le_bytes(),
            &0x10F0_10DE_u32.to_le_bytes(),
        );
        let plain = ModulePatch::new(ModuleId::AppleHDAController, b"abcd", b"efgh");
        let patches = vec![plain.clone(), sentinel];

        let first = substitute_pool_ids(&patches, &mut pool);
        let second = substitute_pool_ids(&patches, &mut pool);
        let third = substitute_pool_ids(&patches, &mut pool);

        assert_eq!(first[0], plain);
        assert_eq!(first[1].find, 0x0E08_10DE_u32.to_le_bytes().to_vec());
        assert_eq!(second[1].find, 0x0E09_10DE_u32.to_le_bytes().to_vec());
        assert_eq!(third, vec![plain]);
    }
}
