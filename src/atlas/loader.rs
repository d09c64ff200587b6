use std::path::{Path, PathBuf};
use std::time::Duration;

use image::RgbaImage;
use tokio::io::AsyncReadExt;
use tokio::runtime::Handle;
use tokio::time::Instant;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::atlas::progress::aggregate_percent;
use crate::atlas::texture::Texture;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::message::{Completion, CompletionSender};

const READ_CHUNK: usize = 64 * 1024;

/// Bounded retry policy for atlas and LOD fetches.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Exponential backoff: `backoff * 2^attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.saturating_pow(attempt.min(16))
    }
}

/// What a state change on the loader means for the rest of the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    Progress(u8),
    TextureLoaded(usize),
    Ready,
    Failed { atlas: usize, reason: String },
}

/// Streams atlas images into their owning textures and aggregates progress.
#[derive(Debug)]
pub struct StreamingLoader {
    textures: Vec<Texture>,
    loaded_textures: usize,
    last_percent: u8,
    ready: bool,
}

impl StreamingLoader {
    /// Builds one texture per `cells_per_texture` block. Every texture holds a full set
    /// of atlases except the last one, which holds the remainder.
    pub fn new(dataset: &Dataset) -> Self {
        let layout = &dataset.layout;
        let texture_count = dataset.texture_count();
        let total_atlases = dataset.atlas_count();

        let textures = (0..texture_count)
            .map(|t| {
                let atlas_count = layout.atlases_in_texture(t, texture_count, total_atlases);
                Texture::new(t, t * layout.atlases_per_texture, atlas_count, layout.texture_edge)
            })
            .collect();

        Self {
            textures,
            loaded_textures: 0,
            last_percent: 0,
            ready: false,
        }
    }

    /// Starts one fetch task per atlas. Completions come back through `sender`.
    pub fn start(&self, handle: &Handle, paths: Vec<PathBuf>, policy: RetryPolicy, sender: CompletionSender) {
        info!("Streaming {} atlases into {} textures", paths.len(), self.textures.len());
        for (atlas, path) in paths.into_iter().enumerate() {
            let sender = sender.clone();
            handle.spawn(async move {
                let progress_sender = sender.clone();
                let result = fetch_with_retry(&path, policy, Some(atlas), move |percent| {
                    let _ = progress_sender.send(Completion::AtlasProgress { atlas, percent });
                })
                .await;
                let completion = match result {
                    Ok(image) => Completion::AtlasDecoded { atlas, image },
                    Err(e) => Completion::AtlasFailed { atlas, reason: e.to_string() },
                };
                let _ = sender.send(completion);
            });
        }
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut [Texture] {
        &mut self.textures
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn loaded_texture_count(&self) -> usize {
        self.loaded_textures
    }

    pub fn percent(&self) -> u8 {
        aggregate_percent(self.textures.iter().map(Texture::progress))
    }

    /// Ready requires every texture loaded, not just a percent that rounds to 100.
    pub fn is_ready(&self) -> bool {
        self.loaded_textures == self.textures.len()
    }

    /// No atlas is still in flight. A settled loader with failures never becomes ready.
    pub fn is_settled(&self) -> bool {
        self.textures.iter().all(|t| t.progress().is_settled())
    }

    fn texture_of_atlas(&mut self, atlas: usize) -> Option<&mut Texture> {
        self.textures.iter_mut().find(|t| t.owns_atlas(atlas))
    }

    fn progress_event(&mut self) -> Option<LoadEvent> {
        let percent = self.percent();
        if percent > self.last_percent {
            self.last_percent = percent;
            return Some(LoadEvent::Progress(percent));
        }
        None
    }

    pub fn on_progress(&mut self, atlas: usize, percent: f32) -> Option<LoadEvent> {
        self.texture_of_atlas(atlas)?.update_progress(atlas, percent);
        self.progress_event()
    }

    pub fn on_decoded(&mut self, atlas: usize, image: &RgbaImage, dataset: &Dataset) -> Vec<LoadEvent> {
        let mut events = Vec::new();
        let cells = dataset.atlas_cells(atlas);
        let layout = dataset.layout;
        let Some(texture) = self.texture_of_atlas(atlas) else {
            warn!("Decoded atlas {} has no owning texture", atlas);
            return events;
        };

        if texture.composite(atlas, image, cells, &layout) {
            let id = texture.id;
            self.loaded_textures += 1;
            debug!("Texture {} loaded ({}/{})", id, self.loaded_textures, self.textures.len());
            events.push(LoadEvent::TextureLoaded(id));
        }
        events.extend(self.progress_event());
        if self.is_ready() && !self.ready {
            self.ready = true;
            info!("All {} textures loaded", self.textures.len());
            events.push(LoadEvent::Ready);
        }
        events
    }

    pub fn on_failed(&mut self, atlas: usize, reason: String) -> Option<LoadEvent> {
        error!("Atlas {} failed permanently: {}", atlas, reason);
        self.texture_of_atlas(atlas)?.mark_failed(atlas);
        Some(LoadEvent::Failed { atlas, reason })
    }
}

/// Reads a file in chunks, reporting 0-100 progress, then decodes it off the async
/// threads.
pub async fn fetch_image(path: &Path, mut on_progress: impl FnMut(f32)) -> Result<RgbaImage> {
    let start = Instant::now();
    let mut file = tokio::fs::File::open(path).await?;
    let total = file.metadata().await?.len().max(1);

    let mut bytes = Vec::with_capacity(total as usize);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);
        on_progress((bytes.len() as f32 / total as f32 * 100.0).min(100.0));
    }

    let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes).map(|img| img.to_rgba8()))
        .await
        .map_err(|e| Error::Streaming {
            atlas: None,
            path: path.to_path_buf(),
            reason: format!("decode task failed: {e}"),
        })??;
    trace!("Fetched {:?} ({}x{}) in {:?}", path, image.width(), image.height(), start.elapsed());
    Ok(image)
}

/// [`fetch_image`] with bounded retries. Exhausting the policy yields a
/// `Error::Streaming` describing the last failure.
pub async fn fetch_with_retry(
    path: &Path,
    policy: RetryPolicy,
    atlas: Option<usize>,
    mut on_progress: impl FnMut(f32),
) -> Result<RgbaImage> {
    let mut attempt = 0;
    loop {
        match fetch_image(path, &mut on_progress).await {
            Ok(image) => return Ok(image),
            Err(e) if attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!("Fetching {:?} failed ({}), retry {} in {:?}", path, e, attempt + 1, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(Error::Streaming {
                    atlas,
                    path: path.to_path_buf(),
                    reason: format!("{e} after {} attempts", attempt + 1),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::Layout;
    use crate::config::Config;
    use crate::manifest::tests::sample_json;
    use crate::manifest::Manifest;
    use crate::message::completion_queue;
    use image::Rgba;

    fn dataset(cell_count: usize) -> Dataset {
        let manifest = Manifest::from_str(&sample_json(cell_count)).unwrap();
        let layout = Layout::with_capacities(4, 4, 4, 64);
        Dataset::new(&manifest, layout, &Config::default()).unwrap()
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn last_texture_gets_the_remainder() {
        // 24 cells => 6 atlases => textures of 4 and 2
        let loader = StreamingLoader::new(&dataset(24));
        assert_eq!(loader.texture_count(), 2);
        assert_eq!(loader.textures()[0].progress().atlas_count(), 4);
        assert_eq!(loader.textures()[1].progress().atlas_count(), 2);
        assert_eq!(loader.textures()[1].first_atlas, 4);
    }

    #[test]
    fn ready_only_after_every_texture_loads() {
        let data = dataset(24);
        let mut loader = StreamingLoader::new(&data);
        let source = RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255]));

        let mut events = Vec::new();
        for atlas in 0..5 {
            events.extend(loader.on_decoded(atlas, &source, &data));
        }
        assert!(events.contains(&LoadEvent::TextureLoaded(0)));
        assert!(!loader.is_ready());
        assert!(!events.contains(&LoadEvent::Ready));

        let last = loader.on_decoded(5, &source, &data);
        assert!(last.contains(&LoadEvent::TextureLoaded(1)));
        assert!(last.contains(&LoadEvent::Ready));
        assert_eq!(loader.percent(), 100);
        assert_eq!(loader.loaded_texture_count(), 2);
    }

    #[test]
    fn failures_are_isolated() {
        let data = dataset(24);
        let mut loader = StreamingLoader::new(&data);
        loader.on_progress(1, 40.0);
        let event = loader.on_failed(1, "corrupt".to_string());
        assert_eq!(event, Some(LoadEvent::Failed { atlas: 1, reason: "corrupt".to_string() }));
        assert!(loader.textures()[0].progress().has_failures());
        assert!(!loader.textures()[1].progress().has_failures());
        assert!(!loader.is_ready());
        assert!(!loader.is_settled());
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy { max_retries: 3, backoff: Duration::from_millis(250) };
        assert_eq!(policy.delay(0), Duration::from_millis(250));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn fetches_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atlas-0.png");
        RgbaImage::from_pixel(8, 8, Rgba([9, 9, 9, 255])).save(&path).unwrap();

        let mut reported = Vec::new();
        let image = fetch_with_retry(&path, quick_policy(), Some(0), |p| reported.push(p)).await.unwrap();
        assert_eq!(image.dimensions(), (8, 8));
        assert_eq!(reported.last().copied(), Some(100.0));
    }

    #[tokio::test]
    async fn missing_file_fails_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetch_with_retry(&dir.path().join("missing.png"), quick_policy(), Some(7), |_| {})
            .await
            .unwrap_err();
        match err {
            Error::Streaming { atlas, reason, .. } => {
                assert_eq!(atlas, Some(7));
                assert!(reason.contains("3 attempts"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_funnels_completions_into_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("atlas-0.png");
        RgbaImage::from_pixel(8, 8, Rgba([9, 9, 9, 255])).save(&good).unwrap();
        let bad = dir.path().join("atlas-1.png");

        let data = dataset(8);
        let loader = StreamingLoader::new(&data);
        let (sender, mut receiver) = completion_queue();
        loader.start(&Handle::current(), vec![good, bad], quick_policy(), sender);

        let mut decoded = false;
        let mut failed = false;
        while let Some(completion) = receiver.recv().await {
            match completion {
                Completion::AtlasDecoded { atlas, .. } => decoded = atlas == 0,
                Completion::AtlasFailed { atlas, .. } => failed = atlas == 1,
                _ => {}
            }
        }
        assert!(decoded && failed);
    }
}
