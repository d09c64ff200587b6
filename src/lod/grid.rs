use glam::Vec3;

/// Spatial quantization cell used to index the LOD cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bucket {
    pub x: i32,
    pub y: i32,
}

impl Bucket {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(&self, other: &Bucket) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// Rectangle `[-2r, +2r] x [-r, +r]` around this bucket, row by row.
    ///
    /// The x extent is twice the y extent to match the anisotropic bucket shape.
    pub fn neighborhood(self, radius: u32) -> impl Iterator<Item = Bucket> {
        let r = radius as i32;
        (-r..=r).flat_map(move |dy| (-2 * r..=2 * r).map(move |dx| Bucket::new(self.x + dx, self.y + dy)))
    }
}

/// Bucket dimensions in world units. The x span is twice the y span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketGrid {
    pub width: f32,
    pub height: f32,
}

impl BucketGrid {
    /// Buckets sized as a fraction of the layout spread.
    pub fn from_spread(spread: f32, fraction: f32) -> Self {
        let height = (spread * fraction).max(f32::EPSILON);
        Self {
            width: height * 2.0,
            height,
        }
    }

    pub fn bucket_of(&self, position: Vec3) -> Bucket {
        Bucket::new(
            (position.x / self.width).floor() as i32,
            (position.y / self.height).floor() as i32,
        )
    }
}
