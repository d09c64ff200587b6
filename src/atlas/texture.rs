use image::{imageops, Rgba, RgbaImage};

#[allow(unused_imports)]
use log::{debug, trace, warn};

use crate::addressing::{center_padding, Layout};
use crate::atlas::progress::TextureProgress;
use crate::dataset::Cell;

/// A texture-sized composite of several atlases.
///
/// The pixel buffer is the CPU copy that gets uploaded once every child atlas is in. It
/// is allocated by the first composite and handed over to the uploader, so a texture
/// only holds host memory while it is loading.
#[derive(Debug)]
pub struct Texture {
    pub id: usize,
    /// Global id of the first atlas this texture owns.
    pub first_atlas: usize,
    edge: u32,
    progress: TextureProgress,
    pixels: Option<RgbaImage>,
    /// Set when the texture finished loading and has not been uploaded yet.
    dirty: bool,
}

impl Texture {
    pub fn new(id: usize, first_atlas: usize, atlas_count: usize, edge: u32) -> Self {
        Self {
            id,
            first_atlas,
            edge,
            progress: TextureProgress::new(atlas_count),
            pixels: None,
            dirty: false,
        }
    }

    pub fn progress(&self) -> &TextureProgress {
        &self.progress
    }

    pub fn owns_atlas(&self, atlas: usize) -> bool {
        atlas >= self.first_atlas && atlas < self.first_atlas + self.progress.atlas_count()
    }

    pub fn update_progress(&mut self, atlas: usize, percent: f32) {
        if let Some(progress) = self.progress.atlas_mut(atlas - self.first_atlas) {
            progress.update(percent);
        }
    }

    pub fn mark_failed(&mut self, atlas: usize) {
        if let Some(progress) = self.progress.atlas_mut(atlas - self.first_atlas) {
            progress.mark_failed();
        }
    }

    /// Copies each cell of a decoded atlas into its precomputed slot of this texture,
    /// centering thumbnails that are smaller than the cell edge.
    ///
    /// Returns true when this was the last missing atlas.
    pub fn composite(&mut self, atlas: usize, source: &RgbaImage, cells: &[Cell], layout: &Layout) -> bool {
        let was_loaded = self.progress.is_loaded();
        let edge = layout.cell_edge;
        let texture_edge = self.edge;
        let pixels = self
            .pixels
            .get_or_insert_with(|| RgbaImage::from_pixel(texture_edge, texture_edge, Rgba([0, 0, 0, 0])));

        for cell in cells {
            let (sx, sy) = layout.cell_origin_in_atlas(cell.address.offset_in_atlas);
            let width = cell.width.min(edge);
            let height = cell.height.min(edge);
            if sx + width > source.width() || sy + height > source.height() {
                warn!(
                    "Cell {} lies outside atlas {} ({}x{}), skipping",
                    cell.id, atlas, source.width(), source.height()
                );
                continue;
            }
            let thumb = imageops::crop_imm(source, sx, sy, width, height).to_image();
            let (pad_x, pad_y) = center_padding(edge, width, height);
            let (tx, ty) = cell.texture_origin;
            imageops::replace(pixels, &thumb, (tx + pad_x) as i64, (ty + pad_y) as i64);
        }

        if let Some(progress) = self.progress.atlas_mut(atlas - self.first_atlas) {
            progress.mark_decoded();
        }
        trace!("Texture {} composited atlas {} ({} cells)", self.id, atlas, cells.len());

        let loaded = !was_loaded && self.progress.is_loaded();
        if loaded {
            self.dirty = true;
        }
        loaded
    }

    pub fn is_loaded(&self) -> bool {
        self.progress.is_loaded()
    }

    /// CPU pixels, present from the first composite until the upload takes them.
    pub fn pixels(&self) -> Option<&RgbaImage> {
        self.pixels.as_ref()
    }

    /// Hands the finished texture to the uploader once; later calls return None.
    pub fn take_upload(&mut self) -> Option<RgbaImage> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        self.pixels.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dataset::Dataset;
    use crate::manifest::tests::sample_json;
    use crate::manifest::Manifest;

    #[test]
    fn composite_centers_thumbnails_in_their_slot() {
        let manifest = Manifest::from_str(&sample_json(8)).unwrap();
        // 4 cells per atlas, 2 atlases per texture => one texture of 2 atlases
        let layout = Layout::with_capacities(4, 4, 2, 64);
        let mut data = Dataset::new(&manifest, layout, &Config::default()).unwrap();
        for cell in &mut data.cells {
            cell.width = 4;
            cell.height = 2;
        }

        let mut texture = Texture::new(0, 0, 2, layout.texture_edge);
        assert!(texture.pixels().is_none());
        let source = RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255]));

        assert!(!texture.composite(0, &source, data.atlas_cells(0), &layout));
        assert!(!texture.is_loaded());
        // cell 0 sits at (0,0) with 1px of vertical padding
        let pixels = texture.pixels().unwrap();
        assert_eq!(pixels.dimensions(), (layout.texture_edge, layout.texture_edge));
        assert_eq!(pixels.get_pixel(0, 0)[3], 0);
        assert_eq!(pixels.get_pixel(0, 1), &Rgba([255, 0, 0, 255]));
        assert_eq!(pixels.get_pixel(0, 3)[3], 0);

        assert!(texture.composite(1, &source, data.atlas_cells(1), &layout));
        assert!(texture.is_loaded());
        let uploaded = texture.take_upload().unwrap();
        // cell 4 is the first cell of atlas 1, to the right of atlas 0
        let (x, y) = data.cells[4].texture_origin;
        assert_eq!((x, y), (8, 0));
        assert_eq!(uploaded.get_pixel(x, y + 1)[0], 255);
    }

    #[test]
    fn upload_releases_the_cpu_copy() {
        let manifest = Manifest::from_str(&sample_json(4)).unwrap();
        let layout = Layout::with_capacities(4, 4, 1, 64);
        let data = Dataset::new(&manifest, layout, &Config::default()).unwrap();
        let mut texture = Texture::new(0, 0, 1, layout.texture_edge);
        let source = RgbaImage::from_pixel(8, 8, Rgba([0, 255, 0, 255]));

        assert!(texture.take_upload().is_none());
        assert!(texture.composite(0, &source, data.atlas_cells(0), &layout));
        assert!(texture.pixels().is_some());
        assert!(texture.take_upload().is_some());
        assert!(texture.pixels().is_none());
        assert!(texture.take_upload().is_none());
        assert!(texture.is_loaded());
    }
}
