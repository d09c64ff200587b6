// Bottom-up load progress: atlas -> texture -> dataset.
//
// Each level owns its own aggregation object and is only updated through method calls.
// Atlas progress never goes backwards, so a retried fetch that restarts from zero
// keeps the aggregate percent non-decreasing.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasState {
    Pending,
    Decoded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasProgress {
    percent: f32,
    state: AtlasState,
}

impl AtlasProgress {
    pub fn new() -> Self {
        Self {
            percent: 0.0,
            state: AtlasState::Pending,
        }
    }

    pub fn update(&mut self, percent: f32) {
        if self.state == AtlasState::Pending {
            self.percent = self.percent.max(percent.clamp(0.0, 100.0));
        }
    }

    pub fn mark_decoded(&mut self) {
        self.percent = 100.0;
        self.state = AtlasState::Decoded;
    }

    /// A failed atlas keeps its last percent.
    pub fn mark_failed(&mut self) {
        if self.state == AtlasState::Pending {
            self.state = AtlasState::Failed;
        }
    }

    pub fn percent(&self) -> f32 {
        self.percent
    }

    pub fn state(&self) -> AtlasState {
        self.state
    }
}

impl Default for AtlasProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress of the atlases owned by one texture.
#[derive(Debug, Clone)]
pub struct TextureProgress {
    atlases: Vec<AtlasProgress>,
}

impl TextureProgress {
    pub fn new(atlas_count: usize) -> Self {
        Self {
            atlases: vec![AtlasProgress::new(); atlas_count],
        }
    }

    pub fn atlas_mut(&mut self, index: usize) -> Option<&mut AtlasProgress> {
        self.atlases.get_mut(index)
    }

    pub fn atlas(&self, index: usize) -> Option<&AtlasProgress> {
        self.atlases.get(index)
    }

    pub fn atlas_count(&self) -> usize {
        self.atlases.len()
    }

    /// `sum(childAtlasProgress) / atlasCountForThisTexture`
    pub fn percent(&self) -> f32 {
        if self.atlases.is_empty() {
            return 100.0;
        }
        self.atlases.iter().map(AtlasProgress::percent).sum::<f32>() / self.atlases.len() as f32
    }

    /// Loaded only once every child atlas has been decoded and composited.
    pub fn is_loaded(&self) -> bool {
        self.atlases.iter().all(|a| a.state() == AtlasState::Decoded)
    }

    /// Every child atlas has either decoded or failed for good.
    pub fn is_settled(&self) -> bool {
        self.atlases.iter().all(|a| a.state() != AtlasState::Pending)
    }

    pub fn has_failures(&self) -> bool {
        self.atlases.iter().any(|a| a.state() == AtlasState::Failed)
    }
}

/// `sum(textureLevelProgress) / textureCount`, as an integer percent.
pub fn aggregate_percent<'a>(textures: impl ExactSizeIterator<Item = &'a TextureProgress>) -> u8 {
    let count = textures.len();
    if count == 0 {
        return 100;
    }
    let sum: f32 = textures.map(TextureProgress::percent).sum();
    (sum / count as f32).floor().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_percent_averages_children() {
        let mut texture = TextureProgress::new(4);
        texture.atlas_mut(0).unwrap().update(100.0);
        texture.atlas_mut(1).unwrap().update(50.0);
        assert_eq!(texture.percent(), 37.5);
        assert!(!texture.is_loaded());
    }

    #[test]
    fn rounding_to_100_does_not_mean_loaded() {
        let mut texture = TextureProgress::new(2);
        texture.atlas_mut(0).unwrap().mark_decoded();
        texture.atlas_mut(1).unwrap().update(100.0);
        assert_eq!(aggregate_percent([&texture].into_iter()), 100);
        assert!(!texture.is_loaded());
        texture.atlas_mut(1).unwrap().mark_decoded();
        assert!(texture.is_loaded());
    }

    #[test]
    fn progress_is_monotonic() {
        let mut textures = vec![TextureProgress::new(2), TextureProgress::new(1)];
        let updates = [(0, 0, 10.0), (1, 0, 40.0), (0, 0, 0.0), (0, 1, 70.0), (0, 0, 5.0), (1, 0, 100.0)];
        let mut last = 0;
        for (t, a, p) in updates {
            textures[t].atlas_mut(a).unwrap().update(p);
            let percent = aggregate_percent(textures.iter());
            assert!(percent >= last);
            last = percent;
        }
    }

    #[test]
    fn failure_freezes_progress() {
        let mut atlas = AtlasProgress::new();
        atlas.update(30.0);
        atlas.mark_failed();
        atlas.update(90.0);
        assert_eq!(atlas.percent(), 30.0);
        assert_eq!(atlas.state(), AtlasState::Failed);
    }
}
