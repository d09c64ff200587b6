pub mod grid;
pub mod slots;

use std::collections::{HashMap, HashSet, VecDeque};

use glam::Vec3;
use image::{imageops, Rgba, RgbaImage};

#[allow(unused_imports)]
use log::{debug, info, trace, warn};

use crate::addressing::center_padding;
use crate::capabilities::Capabilities;
use crate::config::Config;
use crate::dataset::{Dataset, Resolution};
use crate::error::{Error, Result};
use crate::render::batch::{batch_of_mut, Batch, TexCoords};

use self::grid::{Bucket, BucketGrid};
use self::slots::SlotTable;

/// Streams high-resolution images for cells near the camera into one shared texture.
///
/// All mutation happens from [`LodCache::tick`] and the completion handlers, which the
/// render loop calls in order, so the slot table and batch attributes never change
/// underneath a draw.
#[derive(Debug)]
pub struct LodCache {
    grid: BucketGrid,
    radius: u32,
    min_camera_z: f32,
    flush_interval: u64,
    slot_edge: u32,
    lod_edge: u32,
    slots_per_side: u32,

    camera_bucket: Option<Bucket>,
    cells_by_bucket: HashMap<Bucket, Vec<usize>>,
    queue: VecDeque<usize>,
    queued: HashSet<usize>,
    in_flight: HashSet<usize>,
    fetched: Vec<(usize, RgbaImage)>,
    neighbors_requested: bool,
    frame: u64,

    slots: SlotTable,
    pixels: RgbaImage,
    dirty_slots: Vec<usize>,
}

impl LodCache {
    /// Sizes the shared LOD texture to fit both the configured edge and the context's
    /// texture limit. A slot that cannot fit even once is a configuration error.
    pub fn new(config: &Config, caps: &Capabilities, slot_edge: u32, dataset: &Dataset) -> Result<Self> {
        if config.lod_texture_edge == 0 || slot_edge == 0 {
            return Err(Error::config("LOD texture and slot sizes must be non-zero"));
        }
        let edge = caps.max_texture_edge.min(config.lod_texture_edge);
        if slot_edge > edge {
            return Err(Error::config(format!(
                "LOD slot of {slot_edge}px does not fit the usable LOD texture edge {edge}"
            )));
        }
        if edge < config.lod_texture_edge {
            warn!(
                "LOD texture edge {} exceeds the context limit, using {}",
                config.lod_texture_edge, edge
            );
        }
        let slots_per_side = edge / slot_edge;
        let lod_edge = slots_per_side * slot_edge;
        let capacity = (slots_per_side * slots_per_side) as usize;
        info!(
            "LOD texture: {}px, {} slots of {}px, radius {}",
            lod_edge, capacity, slot_edge, config.lod_radius
        );

        let mut cache = Self {
            grid: dataset.grid,
            radius: config.lod_radius,
            min_camera_z: config.lod_min_camera_z,
            flush_interval: config.lod_flush_interval.max(1),
            slot_edge,
            lod_edge,
            slots_per_side,
            camera_bucket: None,
            cells_by_bucket: HashMap::new(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            fetched: Vec::new(),
            neighbors_requested: false,
            frame: 0,
            slots: SlotTable::new(capacity),
            pixels: RgbaImage::from_pixel(lod_edge, lod_edge, Rgba([0, 0, 0, 0])),
            dirty_slots: Vec::new(),
        };
        cache.index_cells(dataset);
        Ok(cache)
    }

    fn index_cells(&mut self, dataset: &Dataset) {
        self.cells_by_bucket.clear();
        for cell in &dataset.cells {
            self.cells_by_bucket.entry(cell.bucket).or_default().push(cell.id);
        }
    }

    pub fn lod_edge(&self) -> u32 {
        self.lod_edge
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.occupied_count()
    }

    pub fn free_count(&self) -> usize {
        self.slots.free_count()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn camera_bucket(&self) -> Option<Bucket> {
        self.camera_bucket
    }

    pub fn slot_origin(&self, slot: usize) -> (u32, u32) {
        let side = self.slots_per_side as usize;
        (
            (slot % side) as u32 * self.slot_edge,
            (slot / side) as u32 * self.slot_edge,
        )
    }

    pub fn slot_edge(&self) -> u32 {
        self.slot_edge
    }

    /// One frame of work. Returns the cell whose high-res image should be fetched now,
    /// if any; at most one per tick.
    pub fn tick(&mut self, camera: Vec3, dataset: &mut Dataset, batches: &mut [Batch]) -> Option<usize> {
        self.frame += 1;
        let bucket = self.grid.bucket_of(camera);
        let near = camera.z < self.min_camera_z;

        if self.camera_bucket != Some(bucket) {
            trace!("Camera moved to bucket {:?}", bucket);
            self.camera_bucket = Some(bucket);
            self.neighbors_requested = false;
            self.evict_outside(bucket, dataset, batches);
            self.drop_stale_queue(bucket, dataset);
            if near {
                self.enqueue_bucket(bucket, dataset);
            }
        }

        let fetch = self.next_fetch(bucket, near, dataset);

        if self.frame % self.flush_interval == 0 {
            self.flush(dataset, batches);
        }
        fetch
    }

    fn next_fetch(&mut self, bucket: Bucket, near: bool, dataset: &Dataset) -> Option<usize> {
        if self.queue.is_empty() && near && !self.neighbors_requested {
            self.neighbors_requested = true;
            for neighbor in bucket.neighborhood(self.radius) {
                self.enqueue_bucket(neighbor, dataset);
            }
            debug!("Queued {} neighbor cells around {:?}", self.queue.len(), bucket);
        }

        while let Some(cell) = self.queue.pop_front() {
            self.queued.remove(&cell);
            if self.slots.is_resident(cell) || self.in_flight.contains(&cell) {
                continue;
            }
            self.in_flight.insert(cell);
            return Some(cell);
        }
        None
    }

    fn enqueue_bucket(&mut self, bucket: Bucket, dataset: &Dataset) {
        let Some(cells) = self.cells_by_bucket.get(&bucket) else {
            return;
        };
        for &cell in cells {
            if cell >= dataset.len()
                || self.slots.is_resident(cell)
                || self.in_flight.contains(&cell)
                || !self.queued.insert(cell)
            {
                continue;
            }
            self.queue.push_back(cell);
        }
    }

    fn drop_stale_queue(&mut self, center: Bucket, dataset: &Dataset) {
        let radius = self.radius;
        let queued = &mut self.queued;
        self.queue.retain(|&cell| {
            let keep = dataset.cells[cell].bucket.manhattan(&center) <= radius;
            if !keep {
                queued.remove(&cell);
            }
            keep
        });
    }

    /// Completion handler for a fetched high-res image; it is committed on the next flush.
    pub fn on_fetched(&mut self, cell: usize, image: RgbaImage) {
        self.fetched.push((cell, image));
    }

    pub fn on_fetch_failed(&mut self, cell: usize, reason: &str) {
        warn!("High-res image for cell {} unavailable: {}", cell, reason);
        self.in_flight.remove(&cell);
    }

    /// Commits fetched images into free slots.
    pub fn flush(&mut self, dataset: &mut Dataset, batches: &mut [Batch]) -> usize {
        let fetched = std::mem::take(&mut self.fetched);
        let mut committed = 0;
        for (cell, image) in fetched {
            self.in_flight.remove(&cell);
            let Some(center) = self.camera_bucket else {
                continue;
            };
            let Some(bucket) = dataset.cells.get(cell).map(|c| c.bucket) else {
                continue;
            };
            if bucket.manhattan(&center) > self.radius {
                trace!("Cell {} left the radius before its flush, dropping", cell);
                continue;
            }
            let slot = match self.slots.occupy(cell, bucket) {
                Ok(slot) => slot,
                Err(e @ Error::CapacityExceeded { .. }) => {
                    warn!("{}", e);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to assign LOD slot: {}", e);
                    continue;
                }
            };
            self.blit(slot, &image);
            dataset.cells[cell].resolution = Resolution::HighRes(slot);
            let coords = TexCoords::lod(self.slot_origin(slot), self.slot_edge, self.lod_edge);
            if let Some(batch) = batch_of_mut(batches, &dataset.layout, cell) {
                batch.patch(cell, coords);
            }
            committed += 1;
        }
        if committed > 0 {
            debug!(
                "Flushed {} LOD images ({} of {} slots used)",
                committed,
                self.slots.occupied_count(),
                self.slots.capacity()
            );
        }
        committed
    }

    fn blit(&mut self, slot: usize, image: &RgbaImage) {
        let edge = self.slot_edge;
        let fitted;
        let image = if image.width() > edge || image.height() > edge {
            let scale = edge as f32 / image.width().max(image.height()) as f32;
            let w = ((image.width() as f32 * scale).round() as u32).clamp(1, edge);
            let h = ((image.height() as f32 * scale).round() as u32).clamp(1, edge);
            fitted = imageops::resize(image, w, h, imageops::FilterType::Triangle);
            &fitted
        } else {
            image
        };

        let (x, y) = self.slot_origin(slot);
        // clear what the previous owner left behind
        let blank = RgbaImage::from_pixel(edge, edge, Rgba([0, 0, 0, 0]));
        imageops::replace(&mut self.pixels, &blank, x as i64, y as i64);
        let (pad_x, pad_y) = center_padding(edge, image.width(), image.height());
        imageops::replace(&mut self.pixels, image, (x + pad_x) as i64, (y + pad_y) as i64);
        self.dirty_slots.push(slot);
    }

    /// Frees every slot farther than the radius from `center` and reverts its cell.
    pub fn evict_outside(&mut self, center: Bucket, dataset: &mut Dataset, batches: &mut [Batch]) -> usize {
        let evicted = self.slots.evict_outside(center, self.radius);
        for &(slot, cell) in &evicted {
            trace!("Evicting cell {} from slot {}", cell, slot);
            self.revert(cell, dataset, batches);
        }
        if !evicted.is_empty() {
            debug!("Evicted {} LOD slots around {:?}", evicted.len(), center);
        }
        evicted.len()
    }

    fn revert(&self, cell: usize, dataset: &mut Dataset, batches: &mut [Batch]) {
        let layout = dataset.layout;
        let Some(item) = dataset.cells.get_mut(cell) else {
            return;
        };
        item.resolution = Resolution::Shared;
        if let Some(batch) = batch_of_mut(batches, &layout, cell) {
            batch.reset(item, &layout);
        }
    }

    /// Re-indexes buckets after cells moved, then evicts what left the radius.
    pub fn reindex(&mut self, dataset: &mut Dataset, batches: &mut [Batch]) {
        self.grid = dataset.grid;
        self.index_cells(dataset);
        let cells = &dataset.cells;
        self.slots.rebucket(|cell| cells[cell].bucket);
        if let Some(center) = self.camera_bucket {
            self.evict_outside(center, dataset, batches);
            self.drop_stale_queue(center, dataset);
        }
        self.neighbors_requested = false;
        // force a fresh bucket evaluation on the next tick
        self.camera_bucket = None;
    }

    /// Slots whose pixels changed since the last upload, with their origin.
    pub fn take_dirty_slots(&mut self) -> Vec<(usize, (u32, u32))> {
        let mut slots = std::mem::take(&mut self.dirty_slots);
        slots.sort_unstable();
        slots.dedup();
        slots.into_iter().map(|s| (s, self.slot_origin(s))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::Layout;
    use crate::manifest::tests::sample_json;
    use crate::manifest::Manifest;
    use crate::render::batch::{build_batches, LOD_SENTINEL};

    fn caps() -> Capabilities {
        Capabilities::new(4096, 16, u32::MAX).unwrap()
    }

    fn config(radius: u32) -> Config {
        Config {
            lod_radius: radius,
            lod_flush_interval: 1,
            lod_texture_edge: 64,
            lod_min_camera_z: 100.0,
            ..Config::default()
        }
    }

    /// Cells 0..n placed at the center of bucket columns `(i, 0)`.
    fn setup(n: usize, config: &Config) -> (Dataset, Vec<Batch>) {
        let manifest = Manifest::from_str(&sample_json(n)).unwrap();
        let layout = Layout::with_capacities(4, 4, 4, 8);
        let mut data = Dataset::new(&manifest, layout, config).unwrap();
        let grid = data.grid;
        for cell in &mut data.cells {
            cell.position = Vec3::new((cell.id as f32 + 0.5) * grid.width, 0.5 * grid.height, 0.0);
            cell.bucket = grid.bucket_of(cell.position);
        }
        let batches = build_batches(&data);
        (data, batches)
    }

    fn camera_over(data: &Dataset, bucket_x: i32, z: f32) -> Vec3 {
        Vec3::new((bucket_x as f32 + 0.5) * data.grid.width, 0.5 * data.grid.height, z)
    }

    fn fill(edge: u32) -> RgbaImage {
        RgbaImage::from_pixel(edge, edge / 2, Rgba([0, 255, 0, 255]))
    }

    #[test]
    fn loads_nearby_cells_one_per_tick_and_patches_batches() {
        let config = config(1);
        let (mut data, mut batches) = setup(10, &config);
        let mut lod = LodCache::new(&config, &caps(), 16, &data).unwrap();
        assert_eq!(lod.capacity(), 16);

        let camera = camera_over(&data, 3, 10.0);
        let mut fetched = Vec::new();
        for _ in 0..10 {
            if let Some(cell) = lod.tick(camera, &mut data, &mut batches) {
                fetched.push(cell);
                lod.on_fetched(cell, fill(16));
            }
        }
        // own bucket first, then the [-2r, 2r] x [-r, r] neighborhood
        assert_eq!(fetched[0], 3);
        fetched.sort_unstable();
        assert_eq!(fetched, vec![1, 2, 3, 4, 5]);

        lod.tick(camera, &mut data, &mut batches);
        // cells 1 and 5 are outside the Manhattan radius at flush time
        assert!(matches!(data.cells[3].resolution, Resolution::HighRes(_)));
        assert!(matches!(data.cells[2].resolution, Resolution::HighRes(_)));
        assert_eq!(data.cells[1].resolution, Resolution::Shared);
        assert_eq!(data.cells[5].resolution, Resolution::Shared);
        assert_eq!(lod.occupied_count(), 3);
        assert_eq!(lod.occupied_count() + lod.free_count(), lod.capacity());

        let coords = batches[0].tex_coords(3).unwrap();
        assert_eq!(coords.selector, LOD_SENTINEL);
        assert_eq!(batches[0].tex_coords(1).unwrap().selector, 0.0);
        assert!(!lod.take_dirty_slots().is_empty());
    }

    #[test]
    fn far_camera_loads_nothing() {
        let config = config(1);
        let (mut data, mut batches) = setup(6, &config);
        let mut lod = LodCache::new(&config, &caps(), 16, &data).unwrap();
        let camera = camera_over(&data, 2, 500.0);
        for _ in 0..5 {
            assert_eq!(lod.tick(camera, &mut data, &mut batches), None);
        }
    }

    #[test]
    fn moving_away_evicts_and_reverts() {
        let config = config(1);
        let (mut data, mut batches) = setup(10, &config);
        let mut lod = LodCache::new(&config, &caps(), 16, &data).unwrap();

        let camera = camera_over(&data, 2, 10.0);
        for _ in 0..8 {
            if let Some(cell) = lod.tick(camera, &mut data, &mut batches) {
                lod.on_fetched(cell, fill(16));
            }
        }
        lod.flush(&mut data, &mut batches);
        assert!(data.cells[2].is_high_res());

        lod.tick(camera_over(&data, 8, 10.0), &mut data, &mut batches);
        assert_eq!(data.cells[2].resolution, Resolution::Shared);
        assert_eq!(batches[0].tex_coords(2), Some(TexCoords::shared(&data.cells[2], &data.layout)));
        assert_eq!(lod.occupied_count() + lod.free_count(), lod.capacity());

        // nothing left to evict around the new bucket
        let center = Bucket::new(8, 0);
        assert_eq!(lod.evict_outside(center, &mut data, &mut batches), 0);
    }

    #[test]
    fn capacity_exceeded_is_skipped() {
        let config = Config {
            lod_texture_edge: 16,
            ..config(3)
        };
        let (mut data, mut batches) = setup(4, &config);
        let mut lod = LodCache::new(&config, &caps(), 16, &data).unwrap();
        assert_eq!(lod.capacity(), 1);

        lod.tick(camera_over(&data, 1, 10.0), &mut data, &mut batches);
        lod.on_fetched(0, fill(16));
        lod.on_fetched(1, fill(16));
        lod.flush(&mut data, &mut batches);
        assert_eq!(lod.occupied_count(), 1);
        assert_eq!(lod.free_count(), 0);
        assert!(data.cells[0].is_high_res());
        assert!(!data.cells[1].is_high_res());
    }

    #[test]
    fn oversized_images_are_fitted_into_the_slot() {
        let config = config(1);
        let (mut data, mut batches) = setup(2, &config);
        let mut lod = LodCache::new(&config, &caps(), 16, &data).unwrap();
        lod.tick(camera_over(&data, 0, 10.0), &mut data, &mut batches);
        lod.on_fetched(0, RgbaImage::from_pixel(64, 32, Rgba([255, 0, 0, 255])));
        lod.flush(&mut data, &mut batches);

        let Resolution::HighRes(slot) = data.cells[0].resolution else {
            panic!("cell 0 should be resident");
        };
        let (x, y) = lod.slot_origin(slot);
        // 16x8 after fitting, padded by 4 rows
        assert_eq!(lod.pixels().get_pixel(x, y + 3)[3], 0);
        assert_eq!(lod.pixels().get_pixel(x, y + 4)[0], 255);
    }

    #[test]
    fn reindex_follows_moved_cells() {
        let config = config(1);
        let (mut data, mut batches) = setup(4, &config);
        let mut lod = LodCache::new(&config, &caps(), 16, &data).unwrap();
        let camera = camera_over(&data, 0, 10.0);
        lod.tick(camera, &mut data, &mut batches);
        lod.on_fetched(0, fill(16));
        lod.flush(&mut data, &mut batches);
        assert!(data.cells[0].is_high_res());

        data.cells[0].position = Vec3::new(50.0 * data.grid.width, 0.0, 0.0);
        data.cells[0].bucket = data.grid.bucket_of(data.cells[0].position);
        lod.reindex(&mut data, &mut batches);
        assert_eq!(data.cells[0].resolution, Resolution::Shared);
        assert_eq!(lod.occupied_count(), 0);
    }

    #[test]
    fn lod_texture_fits_the_context_limit() {
        let config = Config {
            lod_texture_edge: 4096,
            ..config(1)
        };
        let (data, _) = setup(4, &config);
        let small = Capabilities::new(2048, 16, u32::MAX).unwrap();
        let lod = LodCache::new(&config, &small, 128, &data).unwrap();
        assert_eq!(lod.lod_edge(), 2048);
        assert_eq!(lod.capacity(), 16 * 16);
        assert_eq!(lod.pixels().dimensions(), (2048, 2048));
    }

    #[test]
    fn unusable_lod_sizes_are_configuration_errors() {
        let (data, _) = setup(4, &config(1));
        let zero = Config {
            lod_texture_edge: 0,
            ..config(1)
        };
        assert!(matches!(LodCache::new(&zero, &caps(), 16, &data), Err(e) if e.is_fatal()));
        assert!(matches!(LodCache::new(&config(1), &caps(), 0, &data), Err(e) if e.is_fatal()));

        let tiny = Capabilities::new(64, 16, u32::MAX).unwrap();
        let wide = Config {
            lod_texture_edge: 4096,
            ..config(1)
        };
        assert!(matches!(LodCache::new(&wide, &tiny, 128, &data), Err(e) if e.is_fatal()));
    }
}
