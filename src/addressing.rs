//! Deterministic addressing of cells inside the atlas / texture / draw-call hierarchy.
//!
//! Every cell id maps to exactly one atlas, one texture and one draw call. The mapping
//! depends only on the capacity constants held by [`Layout`], so it is computed once
//! when the dataset is built and never changes afterwards. Packing is row-major inside
//! square grids: cells inside an atlas, atlases inside a texture.

#[allow(unused_imports)]
use log::{debug, info};

use crate::capabilities::Capabilities;
use crate::error::{Error, Result};

/// Capacity constants of the packing hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Edge of one low-resolution cell in pixels.
    pub cell_edge: u32,
    /// Edge of one atlas image in pixels.
    pub atlas_edge: u32,
    /// Edge of one composited texture in pixels.
    pub texture_edge: u32,
    /// Cells per atlas row.
    pub atlas_side: usize,
    /// Atlases per texture row.
    pub texture_side: usize,
    pub cells_per_atlas: usize,
    pub atlases_per_texture: usize,
    pub cells_per_texture: usize,
    pub cells_per_draw_call: usize,
}

/// Where one cell lives. Pure function of the cell id and the [`Layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellAddress {
    pub atlas_id: usize,
    pub offset_in_atlas: usize,
    pub texture_id: usize,
    /// Position of the owning atlas inside its texture.
    pub atlas_in_texture: usize,
    pub offset_in_texture: usize,
    pub draw_call_id: usize,
    pub offset_in_draw_call: usize,
}

impl Layout {
    /// Derives the hierarchy from pixel sizes and the graphics context limits.
    ///
    /// The texture edge is the largest multiple of the atlas edge that fits both the
    /// context limit and `texture_edge_cap`.
    pub fn from_sizes(cell_edge: u32, atlas_edge: u32, texture_edge_cap: u32, caps: &Capabilities) -> Result<Self> {
        if cell_edge == 0 || atlas_edge == 0 {
            return Err(Error::config("cell and atlas sizes must be non-zero"));
        }
        if atlas_edge % cell_edge != 0 {
            return Err(Error::config(format!(
                "atlas edge {atlas_edge} is not divisible into cells of {cell_edge}px"
            )));
        }
        let limit = caps.max_texture_edge.min(texture_edge_cap);
        let texture_side = (limit / atlas_edge) as usize;
        if texture_side == 0 {
            return Err(Error::config(format!(
                "atlas edge {atlas_edge} exceeds the usable texture edge {limit}"
            )));
        }

        let atlas_side = (atlas_edge / cell_edge) as usize;
        let cells_per_atlas = atlas_side * atlas_side;
        let atlases_per_texture = texture_side * texture_side;
        let cells_per_texture = cells_per_atlas * atlases_per_texture;
        let cells_per_draw_call = Self::draw_call_capacity(cells_per_texture, caps);

        let layout = Self {
            cell_edge,
            atlas_edge,
            texture_edge: texture_side as u32 * atlas_edge,
            atlas_side,
            texture_side,
            cells_per_atlas,
            atlases_per_texture,
            cells_per_texture,
            cells_per_draw_call,
        };
        debug!("Derived layout: {:?}", layout);
        Ok(layout)
    }

    /// Builds a layout straight from capacities. Capacities are expected to be
    /// perfect squares; non-square counts still address correctly, the grid side is
    /// rounded up.
    pub fn with_capacities(
        cell_edge: u32,
        cells_per_atlas: usize,
        atlases_per_texture: usize,
        cells_per_draw_call: usize,
    ) -> Self {
        let atlas_side = ceil_sqrt(cells_per_atlas);
        let texture_side = ceil_sqrt(atlases_per_texture);
        let atlas_edge = atlas_side as u32 * cell_edge;
        Self {
            cell_edge,
            atlas_edge,
            texture_edge: texture_side as u32 * atlas_edge,
            atlas_side,
            texture_side,
            cells_per_atlas,
            atlases_per_texture,
            cells_per_texture: cells_per_atlas * atlases_per_texture,
            cells_per_draw_call,
        }
    }

    /// `min(maxIndexedVertices, (maxBoundTextureUnits - 1) * cellsPerTexture)`.
    pub fn draw_call_capacity(cells_per_texture: usize, caps: &Capabilities) -> usize {
        let by_units = caps.atlas_texture_units() as usize * cells_per_texture;
        by_units.min(caps.max_indexed_vertices as usize)
    }

    pub fn texture_id(&self, cell: usize) -> usize {
        cell / self.cells_per_texture
    }

    pub fn atlas_id(&self, cell: usize) -> usize {
        cell / self.cells_per_atlas
    }

    pub fn offset_in_atlas(&self, cell: usize) -> usize {
        cell % self.cells_per_atlas
    }

    pub fn texture_of_atlas(&self, atlas: usize) -> usize {
        atlas / self.atlases_per_texture
    }

    pub fn atlas_in_texture(&self, atlas: usize) -> usize {
        atlas % self.atlases_per_texture
    }

    pub fn draw_call_id(&self, cell: usize) -> usize {
        cell / self.cells_per_draw_call
    }

    pub fn offset_in_draw_call(&self, cell: usize) -> usize {
        cell % self.cells_per_draw_call
    }

    pub fn address(&self, cell: usize) -> CellAddress {
        let atlas_id = self.atlas_id(cell);
        CellAddress {
            atlas_id,
            offset_in_atlas: self.offset_in_atlas(cell),
            texture_id: self.texture_id(cell),
            atlas_in_texture: self.atlas_in_texture(atlas_id),
            offset_in_texture: cell % self.cells_per_texture,
            draw_call_id: self.draw_call_id(cell),
            offset_in_draw_call: self.offset_in_draw_call(cell),
        }
    }

    /// Top-left pixel of a cell slot inside its atlas image.
    pub fn cell_origin_in_atlas(&self, offset_in_atlas: usize) -> (u32, u32) {
        let col = (offset_in_atlas % self.atlas_side) as u32;
        let row = (offset_in_atlas / self.atlas_side) as u32;
        (col * self.cell_edge, row * self.cell_edge)
    }

    /// Top-left pixel of an atlas inside its texture.
    pub fn atlas_origin_in_texture(&self, atlas_in_texture: usize) -> (u32, u32) {
        let col = (atlas_in_texture % self.texture_side) as u32;
        let row = (atlas_in_texture / self.texture_side) as u32;
        (col * self.atlas_edge, row * self.atlas_edge)
    }

    /// Top-left pixel of a cell slot inside its texture.
    pub fn cell_origin_in_texture(&self, address: &CellAddress) -> (u32, u32) {
        let (ax, ay) = self.atlas_origin_in_texture(address.atlas_in_texture);
        let (cx, cy) = self.cell_origin_in_atlas(address.offset_in_atlas);
        (ax + cx, ay + cy)
    }

    pub fn atlas_count(&self, cell_count: usize) -> usize {
        cell_count.div_ceil(self.cells_per_atlas)
    }

    pub fn texture_count(&self, cell_count: usize) -> usize {
        cell_count.div_ceil(self.cells_per_texture)
    }

    pub fn draw_call_count(&self, cell_count: usize) -> usize {
        cell_count.div_ceil(self.cells_per_draw_call)
    }

    /// Number of atlases owned by `texture`. Every texture is full except the last,
    /// which holds the remainder (or a full set when the remainder is zero).
    pub fn atlases_in_texture(&self, texture: usize, texture_count: usize, total_atlases: usize) -> usize {
        if texture + 1 < texture_count {
            return self.atlases_per_texture;
        }
        match total_atlases % self.atlases_per_texture {
            0 => self.atlases_per_texture,
            rest => rest,
        }
    }
}

/// Centering padding for a `width` x `height` image inside a square slot of `edge`.
/// Oversized images get zero padding and are clipped by the caller.
pub fn center_padding(edge: u32, width: u32, height: u32) -> (u32, u32) {
    (edge.saturating_sub(width) / 2, edge.saturating_sub(height) / 2)
}

fn ceil_sqrt(n: usize) -> usize {
    let mut side = (n as f64).sqrt() as usize;
    while side * side < n {
        side += 1;
    }
    side.max(1)
}
