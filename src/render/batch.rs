use rayon::prelude::*;

#[allow(unused_imports)]
use log::{debug, trace, warn};

use crate::addressing::Layout;
use crate::dataset::{Cell, Dataset};
use crate::picking;

/// Texture selector meaning "sample the shared LOD texture".
pub const LOD_SENTINEL: f32 = -1.0;

/// The per-cell attributes that decide where a point samples its image from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexCoords {
    pub selector: f32,
    /// Top-left of the cell slot, normalized to the sampled texture.
    pub offset: [f32; 2],
    /// Slot edge, normalized to the sampled texture.
    pub size: f32,
}

impl TexCoords {
    /// Default attributes: the low-res slot in the cell's shared texture.
    pub fn shared(cell: &Cell, layout: &Layout) -> Self {
        let edge = layout.texture_edge as f32;
        let (x, y) = cell.texture_origin;
        Self {
            selector: cell.address.texture_id as f32,
            offset: [x as f32 / edge, y as f32 / edge],
            size: layout.cell_edge as f32 / edge,
        }
    }

    /// Attributes for a slot of the LOD texture.
    pub fn lod(origin: (u32, u32), slot_edge: u32, lod_edge: u32) -> Self {
        let edge = lod_edge as f32;
        Self {
            selector: LOD_SENTINEL,
            offset: [origin.0 as f32 / edge, origin.1 as f32 / edge],
            size: slot_edge as f32 / edge,
        }
    }

    pub fn is_lod(&self) -> bool {
        self.selector < 0.0
    }
}

/// One draw call worth of instance attributes, stored as one dense array per attribute.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: usize,
    pub first_cell: usize,
    pub selectors: Vec<f32>,
    pub sizes: Vec<f32>,
    pub offsets: Vec<[f32; 2]>,
    pub positions: Vec<[f32; 3]>,
    pub targets: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 3]>,
    /// Offsets (within the batch) whose texture attributes changed since the last upload.
    dirty_cells: Vec<usize>,
    positions_dirty: bool,
    targets_dirty: bool,
}

impl Batch {
    pub fn new(id: usize, cells: &[Cell], layout: &Layout) -> Self {
        let first_cell = cells.first().map_or(id * layout.cells_per_draw_call, |c| c.id);
        let mut batch = Self {
            id,
            first_cell,
            selectors: Vec::with_capacity(cells.len()),
            sizes: Vec::with_capacity(cells.len()),
            offsets: Vec::with_capacity(cells.len()),
            positions: Vec::with_capacity(cells.len()),
            targets: Vec::with_capacity(cells.len()),
            colors: Vec::with_capacity(cells.len()),
            dirty_cells: Vec::new(),
            positions_dirty: false,
            targets_dirty: false,
        };
        for cell in cells {
            let coords = TexCoords::shared(cell, layout);
            batch.selectors.push(coords.selector);
            batch.sizes.push(coords.size);
            batch.offsets.push(coords.offset);
            batch.positions.push(cell.position.to_array());
            batch.targets.push(cell.target.to_array());
            batch.colors.push(picking::color_of_normalized(cell.id));
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn contains(&self, cell: usize) -> bool {
        cell >= self.first_cell && cell < self.first_cell + self.len()
    }

    /// Smallest contiguous range of shared textures this batch samples, or None when
    /// every cell reads the LOD texture.
    pub fn bound_range(&self) -> Option<(usize, usize)> {
        bound_range(&self.selectors)
    }

    pub fn tex_coords(&self, cell: usize) -> Option<TexCoords> {
        let i = self.index_of(cell)?;
        Some(TexCoords {
            selector: self.selectors[i],
            offset: self.offsets[i],
            size: self.sizes[i],
        })
    }

    /// Rewrites the texture attributes of a single cell.
    pub fn patch(&mut self, cell: usize, coords: TexCoords) {
        let Some(i) = self.index_of(cell) else {
            warn!("Cell {} is not part of draw call {}", cell, self.id);
            return;
        };
        self.selectors[i] = coords.selector;
        self.offsets[i] = coords.offset;
        self.sizes[i] = coords.size;
        self.dirty_cells.push(i);
    }

    /// Reverts a cell to its shared-texture attributes.
    pub fn reset(&mut self, cell: &Cell, layout: &Layout) {
        self.patch(cell.id, TexCoords::shared(cell, layout));
    }

    pub fn sync_targets(&mut self, cells: &[Cell]) {
        for (slot, cell) in self.targets.iter_mut().zip(cells) {
            *slot = cell.target.to_array();
        }
        self.targets_dirty = true;
    }

    pub fn sync_positions(&mut self, cells: &[Cell]) {
        for (slot, cell) in self.positions.iter_mut().zip(cells) {
            *slot = cell.position.to_array();
        }
        self.positions_dirty = true;
    }

    /// Drains the set of cell offsets whose texture attributes need uploading.
    pub fn take_dirty_cells(&mut self) -> Vec<usize> {
        let mut dirty = std::mem::take(&mut self.dirty_cells);
        dirty.sort_unstable();
        dirty.dedup();
        dirty
    }

    pub fn take_positions_dirty(&mut self) -> bool {
        std::mem::take(&mut self.positions_dirty)
    }

    pub fn take_targets_dirty(&mut self) -> bool {
        std::mem::take(&mut self.targets_dirty)
    }

    fn index_of(&self, cell: usize) -> Option<usize> {
        self.contains(cell).then(|| cell - self.first_cell)
    }
}

/// Scans from both ends, skipping LOD sentinels. An all-sentinel slice yields None:
/// the draw binds the LOD texture only.
pub fn bound_range(selectors: &[f32]) -> Option<(usize, usize)> {
    let first = selectors.iter().position(|&s| s >= 0.0)?;
    let last = selectors.iter().rposition(|&s| s >= 0.0)?;
    let (a, b) = (selectors[first] as usize, selectors[last] as usize);
    Some((a.min(b), a.max(b)))
}

/// Partitions the dataset, by id, into draw calls of `cells_per_draw_call`.
pub fn build_batches(dataset: &Dataset) -> Vec<Batch> {
    let layout = dataset.layout;
    let batches: Vec<Batch> = (0..dataset.draw_call_count())
        .into_par_iter()
        .map(|d| Batch::new(d, dataset.draw_call_cells(d), &layout))
        .collect();
    debug!("Built {} draw calls of up to {} cells", batches.len(), layout.cells_per_draw_call);
    batches
}

/// Batch that holds `cell`.
pub fn batch_of_mut<'a>(batches: &'a mut [Batch], layout: &Layout, cell: usize) -> Option<&'a mut Batch> {
    batches.get_mut(layout.draw_call_id(cell))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::manifest::tests::sample_json;
    use crate::manifest::Manifest;

    fn dataset(cell_count: usize) -> Dataset {
        let manifest = Manifest::from_str(&sample_json(cell_count)).unwrap();
        let layout = Layout::with_capacities(4, 4, 4, 20);
        Dataset::new(&manifest, layout, &Config::default()).unwrap()
    }

    #[test]
    fn bound_range_skips_sentinels_at_both_ends() {
        assert_eq!(bound_range(&[-1.0, -1.0, 3.0, 4.0, 4.0, -1.0]), Some((3, 4)));
        assert_eq!(bound_range(&[2.0]), Some((2, 2)));
    }

    #[test]
    fn all_sentinel_chunk_binds_nothing() {
        assert_eq!(bound_range(&[-1.0, -1.0, -1.0]), None);
        assert_eq!(bound_range(&[]), None);
    }

    #[test]
    fn partitions_by_id() {
        let data = dataset(50);
        let batches = build_batches(&data);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].first_cell, 40);
        assert_eq!(batches[2].len(), 10);
        // cells 0..20 span textures 0 and 1 (16 cells each)
        assert_eq!(batches[0].bound_range(), Some((0, 1)));
        assert_eq!(batches[1].colors[0], picking::color_of_normalized(20));
    }

    #[test]
    fn patch_and_reset_touch_one_cell() {
        let data = dataset(20);
        let mut batches = build_batches(&data);
        let batch = &mut batches[0];
        let before = batch.tex_coords(17).unwrap();
        assert_eq!(before.selector, 1.0);

        let lod = TexCoords::lod((128, 0), 128, 1024);
        batch.patch(17, lod);
        assert_eq!(batch.tex_coords(17), Some(lod));
        assert_eq!(batch.tex_coords(16).unwrap().selector, 1.0);
        assert_eq!(batch.take_dirty_cells(), vec![17]);
        assert!(batch.take_dirty_cells().is_empty());

        batch.reset(&data.cells[17], &data.layout);
        assert_eq!(batch.tex_coords(17), Some(before));
    }

    #[test]
    fn all_lod_batch_has_no_bound_range() {
        let data = dataset(4);
        let mut batches = build_batches(&data);
        for cell in 0..4 {
            batches[0].patch(cell, TexCoords::lod((0, 0), 128, 1024));
        }
        assert_eq!(batches[0].bound_range(), None);
    }
}
