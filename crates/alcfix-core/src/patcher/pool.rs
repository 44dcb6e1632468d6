//! Substitute device ids for NVIDIA HDMI audio functions.

use tracing::debug;

use crate::facts::builtin::NVIDIA_POOL_IDS;

/// Fixed set of device ids that discrete NVIDIA audio functions borrow.
///
/// Ids are handed out in table order, first unused wins, and the cursor
/// never moves backwards: once the pool is exhausted every further request
/// fails instead of wrapping around.
#[derive(Debug, Clone)]
pub struct NvidiaDeviceIdPool
{
    ids: Vec<u32>,
    used: Vec<bool>,
    cursor: usize,
}

impl Default for NvidiaDeviceIdPool
{
    fn default() -> Self
    {
        Self::new(&NVIDIA_POOL_IDS)
    }
}

impl NvidiaDeviceIdPool
{
    /// Create a pool over `ids`.
    #[must_use]
    pub fn new(ids: &[u32]) -> Self
    {
        Self {
            ids: ids.to_vec(),
            used: vec![false; ids.len()],
            cursor: 0,
        }
    }

    /// Mark `id` as taken because a present device already owns it.
    ///
    /// Returns `true` if the id belongs to the pool.
    pub fn reserve(&mut self, id: u32) -> bool
    {
        let mut found = false;
        for (slot, used) in self.ids.iter().zip(self.used.iter_mut()) {
            if *slot == id {
                *used = true;
                found = true;
            }
        }
        if found {
            debug!("reserved native pool id {id:08X}");
        }
        found
    }

    /// Take the next free id, `None` once exhausted.
    pub fn next_free(&mut self) -> Option<u32>
    {
        while self.cursor < self.ids.len() {
            let index = self.cursor;
            self.cursor += 1;
            if !self.used[index] {
                self.used[index] = true;
                debug!("assigned pool id {:08X} at {index}", self.ids[index]);
                return Some(self.ids[index]);
            }
        }
        None
    }

    /// Total number of ids in the pool.
    #[must_use]
    pub fn capacity(&self) -> usize
    {
        self.ids.len()
    }

    /// Ids handed out or reserved so far.
    #[must_use]
    pub fn used_ids(&self) -> Vec<u32>
    {
        self.ids
            .iter()
            .zip(&self.used)
            .filter(|(_, used)| **used)
            .map(|(id, _)| *id)
            .collect()
    }
}
