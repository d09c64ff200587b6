use std::collections::BTreeMap;

use glam::Vec3;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::addressing::{CellAddress, Layout};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::lod::grid::{Bucket, BucketGrid};
use crate::manifest::Manifest;

/// Texture a cell is currently sampled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Reads its low-resolution slot of the shared atlas textures.
    Shared,
    /// Reads an owned slot of the high-resolution LOD texture.
    HighRes(usize),
}

/// One image of the collection.
#[derive(Debug, Clone)]
pub struct Cell {
    pub id: usize,
    pub name: String,
    /// Low-resolution thumbnail size in pixels.
    pub width: u32,
    pub height: u32,
    pub address: CellAddress,
    /// Top-left pixel of the cell slot inside its texture.
    pub texture_origin: (u32, u32),
    pub bucket: Bucket,
    pub position: Vec3,
    pub target: Vec3,
    pub resolution: Resolution,
}

impl Cell {
    pub fn is_high_res(&self) -> bool {
        matches!(self.resolution, Resolution::HighRes(_))
    }
}

/// Every cell plus the named layouts they can be arranged in.
#[derive(Debug)]
pub struct Dataset {
    pub layout: Layout,
    pub cells: Vec<Cell>,
    pub grid: BucketGrid,
    layouts: BTreeMap<String, Vec<Vec3>>,
    current_layout: String,
}

impl Dataset {
    pub fn new(manifest: &Manifest, layout: Layout, config: &Config) -> Result<Self> {
        let cell_count = manifest.cell_count;
        if layout.cells_per_draw_call == 0 {
            return Err(Error::config("draw call capacity is zero"));
        }
        if manifest.images.len() != cell_count || manifest.cell_sizes.len() != cell_count {
            return Err(Error::config(format!(
                "manifest totals disagree: {} cells, {} images, {} sizes",
                cell_count,
                manifest.images.len(),
                manifest.cell_sizes.len()
            )));
        }

        let mut layouts = BTreeMap::new();
        for name in manifest.layout_names() {
            let raw = manifest.resolve_layout(name)?;
            layouts.insert(name.to_string(), normalize(&raw, config.layout_spread));
        }
        if !layouts.contains_key("grid") {
            debug!("No grid layout in manifest, synthesizing one");
            layouts.insert("grid".to_string(), normalize(&grid_positions(cell_count), config.layout_spread));
        }
        let scatter = layouts
            .get("scatter")
            .ok_or_else(|| Error::config("manifest has no `scatter` layout"))?;

        let grid = BucketGrid::from_spread(config.layout_spread, config.lod_bucket_fraction);
        let cells = manifest
            .images
            .iter()
            .zip(&manifest.cell_sizes)
            .zip(scatter)
            .enumerate()
            .map(|(id, ((name, &[width, height]), &position))| {
                let address = layout.address(id);
                Cell {
                    id,
                    name: name.clone(),
                    width,
                    height,
                    texture_origin: layout.cell_origin_in_texture(&address),
                    address,
                    bucket: grid.bucket_of(position),
                    position,
                    target: position,
                    resolution: Resolution::Shared,
                }
            })
            .collect();

        info!(
            "Dataset: {} cells, {} atlases, {} textures, {} draw calls",
            cell_count,
            layout.atlas_count(cell_count),
            layout.texture_count(cell_count),
            layout.draw_call_count(cell_count)
        );

        Ok(Self {
            layout,
            cells,
            grid,
            layouts,
            current_layout: "scatter".to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn atlas_count(&self) -> usize {
        self.layout.atlas_count(self.cells.len())
    }

    pub fn texture_count(&self) -> usize {
        self.layout.texture_count(self.cells.len())
    }

    pub fn draw_call_count(&self) -> usize {
        self.layout.draw_call_count(self.cells.len())
    }

    pub fn current_layout(&self) -> &str {
        &self.current_layout
    }

    pub fn layout_names(&self) -> impl Iterator<Item = &str> {
        self.layouts.keys().map(String::as_str)
    }

    pub fn layout_positions(&self, name: &str) -> Option<&[Vec3]> {
        self.layouts.get(name).map(Vec::as_slice)
    }

    /// Points every cell's target at its coordinates under `name`.
    pub fn retarget(&mut self, name: &str) -> Result<()> {
        let positions = self
            .layouts
            .get(name)
            .ok_or_else(|| Error::config(format!("unknown layout `{name}`")))?;
        for (cell, &target) in self.cells.iter_mut().zip(positions) {
            cell.target = target;
        }
        self.current_layout = name.to_string();
        Ok(())
    }

    /// Commits targets as positions and recomputes grid buckets.
    pub fn settle(&mut self) {
        let grid = self.grid;
        for cell in &mut self.cells {
            cell.position = cell.target;
            cell.bucket = grid.bucket_of(cell.position);
        }
    }

    /// Cells covered by one draw call.
    pub fn draw_call_cells(&self, draw_call: usize) -> &[Cell] {
        let per = self.layout.cells_per_draw_call;
        let start = (draw_call * per).min(self.cells.len());
        let end = (start + per).min(self.cells.len());
        &self.cells[start..end]
    }

    pub fn atlas_cells(&self, atlas: usize) -> &[Cell] {
        let per = self.layout.cells_per_atlas;
        let start = (atlas * per).min(self.cells.len());
        let end = (start + per).min(self.cells.len());
        &self.cells[start..end]
    }
}

/// Centers a layout on its bounding box and scales it into `[-spread, spread]`,
/// keeping the aspect ratio.
pub fn normalize(raw: &[[f32; 2]], spread: f32) -> Vec<Vec3> {
    let (mut min, mut max) = ([f32::MAX; 2], [f32::MIN; 2]);
    for p in raw {
        for axis in 0..2 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }
    let center = [(min[0] + max[0]) / 2.0, (min[1] + max[1]) / 2.0];
    let half = ((max[0] - min[0]).max(max[1] - min[1]) / 2.0).max(f32::EPSILON);
    raw.iter()
        .map(|p| {
            Vec3::new(
                (p[0] - center[0]) / half * spread,
                (p[1] - center[1]) / half * spread,
                0.0,
            )
        })
        .collect()
}

/// Row-major square grid, used when the manifest carries no grid layout.
pub fn grid_positions(count: usize) -> Vec<[f32; 2]> {
    let side = (count as f64).sqrt().ceil().max(1.0) as usize;
    (0..count)
        .map(|i| [(i % side) as f32, -((i / side) as f32)])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::sample_json;

    fn dataset(cell_count: usize) -> Dataset {
        let manifest = Manifest::from_str(&sample_json(cell_count)).unwrap();
        let layout = Layout::with_capacities(32, 16, 4, 40);
        Dataset::new(&manifest, layout, &Config::default()).unwrap()
    }

    #[test]
    fn derives_topology_once() {
        let data = dataset(100);
        assert_eq!(data.len(), 100);
        assert_eq!(data.atlas_count(), 7);
        assert_eq!(data.texture_count(), 2);
        assert_eq!(data.draw_call_count(), 3);
        let cell = &data.cells[70];
        assert_eq!(cell.address.atlas_id, 4);
        assert_eq!(cell.address.texture_id, 1);
        assert_eq!(cell.resolution, Resolution::Shared);
        assert_eq!(data.draw_call_cells(2).len(), 20);
        assert_eq!(data.atlas_cells(6).len(), 4);
    }

    #[test]
    fn synthesizes_grid_and_retargets() {
        let mut data = dataset(9);
        assert!(data.layout_names().any(|n| n == "grid"));
        data.retarget("grid").unwrap();
        assert_eq!(data.current_layout(), "grid");
        assert_ne!(data.cells[1].position, data.cells[1].target);
        data.settle();
        assert_eq!(data.cells[1].position, data.cells[1].target);
        assert_eq!(data.cells[1].bucket, data.grid.bucket_of(data.cells[1].position));
        assert!(data.retarget("tsne").is_err());
    }

    #[test]
    fn normalize_keeps_aspect() {
        let positions = normalize(&[[0.0, 0.0], [4.0, 2.0]], 10.0);
        assert_eq!(positions[0], Vec3::new(-10.0, -5.0, 0.0));
        assert_eq!(positions[1], Vec3::new(10.0, 5.0, 0.0));
    }
}
