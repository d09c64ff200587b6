use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::lod::grid::Bucket;

/// Ownership of the fixed slots of the LOD texture.
///
/// Every slot is either on the free-list or owned by exactly one cell, and every owned
/// slot is indexed under the bucket its cell lives in.
#[derive(Debug)]
pub struct SlotTable {
    free: Vec<usize>,
    owners: Vec<Option<(usize, Bucket)>>,
    by_bucket: HashMap<Bucket, BTreeSet<usize>>,
    by_cell: HashMap<usize, usize>,
}

impl SlotTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            // popped from the back, so slot 0 is handed out first
            free: (0..capacity).rev().collect(),
            owners: vec![None; capacity],
            by_bucket: HashMap::new(),
            by_cell: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.owners.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn occupied_count(&self) -> usize {
        self.by_cell.len()
    }

    pub fn slot_of(&self, cell: usize) -> Option<usize> {
        self.by_cell.get(&cell).copied()
    }

    pub fn is_resident(&self, cell: usize) -> bool {
        self.by_cell.contains_key(&cell)
    }

    pub fn owner(&self, slot: usize) -> Option<usize> {
        self.owners.get(slot).copied().flatten().map(|(cell, _)| cell)
    }

    /// Gives `cell` a slot. A cell that already owns one keeps it.
    pub fn occupy(&mut self, cell: usize, bucket: Bucket) -> Result<usize> {
        if let Some(slot) = self.slot_of(cell) {
            return Ok(slot);
        }
        let slot = self.free.pop().ok_or(Error::CapacityExceeded { cell })?;
        self.owners[slot] = Some((cell, bucket));
        self.by_bucket.entry(bucket).or_default().insert(slot);
        self.by_cell.insert(cell, slot);
        Ok(slot)
    }

    /// Returns a slot to the free-list. Releasing a free slot is a no-op.
    pub fn release(&mut self, slot: usize) -> Option<usize> {
        let (cell, bucket) = self.owners.get_mut(slot)?.take()?;
        if let Some(slots) = self.by_bucket.get_mut(&bucket) {
            slots.remove(&slot);
            if slots.is_empty() {
                self.by_bucket.remove(&bucket);
            }
        }
        self.by_cell.remove(&cell);
        self.free.push(slot);
        Some(cell)
    }

    /// Releases every slot whose bucket is farther than `radius` (Manhattan) from
    /// `center`. Returns the `(slot, cell)` pairs that were freed.
    pub fn evict_outside(&mut self, center: Bucket, radius: u32) -> Vec<(usize, usize)> {
        let far: Vec<usize> = self
            .by_bucket
            .iter()
            .filter(|(bucket, _)| bucket.manhattan(&center) > radius)
            .flat_map(|(_, slots)| slots.iter().copied())
            .collect();
        far.into_iter()
            .filter_map(|slot| self.release(slot).map(|cell| (slot, cell)))
            .collect()
    }

    /// Re-files every owned slot under the current bucket of its cell.
    pub fn rebucket(&mut self, bucket_of: impl Fn(usize) -> Bucket) {
        self.by_bucket.clear();
        for (slot, owner) in self.owners.iter_mut().enumerate() {
            if let Some((cell, bucket)) = owner {
                *bucket = bucket_of(*cell);
                self.by_bucket.entry(*bucket).or_default().insert(slot);
            }
        }
    }
}
