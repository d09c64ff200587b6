use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TryRecvError;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::addressing::Layout;
use crate::atlas::loader::fetch_with_retry;
use crate::atlas::{LoadEvent, RetryPolicy, StreamingLoader};
use crate::capabilities::Capabilities;
use crate::config::Config;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::lod::LodCache;
use crate::manifest::Manifest;
use crate::message::{completion_queue, Command, Completion, CompletionReceiver, CompletionSender, Event};
use crate::render::batch::{build_batches, Batch};
use crate::render::camera::Camera;
use crate::transition::TransitionController;
use crate::utils::timing::TimingStats;

const SLOW_TICK: Duration = Duration::from_millis(50);

/// Resolves a surface pixel to a cell. Implemented on top of the GPU picking pass.
pub trait Picker {
    fn pick(&mut self, x: u32, y: u32) -> Option<usize>;
}

/// Every component of the viewer, built once at start-up and driven by [`AppContext::tick`].
pub struct AppContext {
    pub config: Config,
    pub manifest: Manifest,
    pub dataset: Dataset,
    pub loader: StreamingLoader,
    pub batches: Vec<Batch>,
    pub lod: LodCache,
    pub transitions: TransitionController,
    pub camera: Camera,
    handle: Handle,
    sender: CompletionSender,
    receiver: CompletionReceiver,
    policy: RetryPolicy,
    tick_stats: TimingStats,
    ready_emitted: bool,
}

impl AppContext {
    /// Derives the whole topology up front. Any inconsistency is a configuration error
    /// and nothing is started.
    pub fn new(manifest: Manifest, config: Config, caps: &Capabilities, handle: Handle) -> Result<Self> {
        let layout = Layout::from_sizes(manifest.sizes.cell, manifest.sizes.atlas, config.texture_edge_cap, caps)?;
        let dataset = Dataset::new(&manifest, layout, &config)?;
        let loader = StreamingLoader::new(&dataset);
        let batches = build_batches(&dataset);
        let lod = LodCache::new(&config, caps, manifest.sizes.lod, &dataset)?;
        let aspect = config.window_width as f32 / config.window_height.max(1) as f32;
        let camera = Camera::overview(aspect, config.layout_spread);
        let transitions = TransitionController::new(config.transition_duration, config.fly_duration);
        let policy = RetryPolicy {
            max_retries: config.max_fetch_retries,
            backoff: config.retry_backoff,
        };
        let (sender, receiver) = completion_queue();

        Ok(Self {
            config,
            manifest,
            dataset,
            loader,
            batches,
            lod,
            transitions,
            camera,
            handle,
            sender,
            receiver,
            policy,
            tick_stats: TimingStats::new("Tick", SLOW_TICK),
            ready_emitted: false,
        })
    }

    /// Kicks off every atlas fetch.
    pub fn start(&self) {
        let paths = (0..self.dataset.atlas_count())
            .map(|atlas| self.manifest.atlas_path(atlas))
            .collect();
        self.loader.start(&self.handle, paths, self.policy, self.sender.clone());
    }

    pub fn is_ready(&self) -> bool {
        self.loader.is_ready()
    }

    /// One frame: drain completions, advance tweens, then let the LOD cache do its
    /// bounded share of work.
    pub fn tick(&mut self, now: Instant) -> Vec<Event> {
        let start = Instant::now();
        let mut events = self.drain_completions();
        self.transitions.update_camera(&mut self.camera, now);
        if let Some(cell) = self.lod.tick(self.camera.eye, &mut self.dataset, &mut self.batches) {
            self.spawn_lod_fetch(cell);
        }
        if !self.ready_emitted && self.loader.is_ready() {
            self.ready_emitted = true;
            events.push(Event::Ready);
        }
        self.tick_stats.add_measurement(start.elapsed());
        events
    }

    fn drain_completions(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let completion = match self.receiver.try_recv() {
                Ok(completion) => completion,
                Err(TryRecvError::Empty) => break,
                // we hold a sender, so this only happens on teardown
                Err(TryRecvError::Disconnected) => break,
            };
            self.apply(completion, &mut events);
        }
        events
    }

    fn apply(&mut self, completion: Completion, events: &mut Vec<Event>) {
        match completion {
            Completion::AtlasProgress { atlas, percent } => {
                if let Some(event) = self.loader.on_progress(atlas, percent) {
                    Self::push_load_event(event, events);
                }
            }
            Completion::AtlasDecoded { atlas, image } => {
                for event in self.loader.on_decoded(atlas, &image, &self.dataset) {
                    Self::push_load_event(event, events);
                }
            }
            Completion::AtlasFailed { atlas, reason } => {
                if let Some(event) = self.loader.on_failed(atlas, reason) {
                    Self::push_load_event(event, events);
                }
            }
            Completion::LodFetched { cell, image } => self.lod.on_fetched(cell, image),
            Completion::LodFailed { cell, reason } => self.lod.on_fetch_failed(cell, &reason),
            Completion::TransitionFinished { generation } => {
                if let Some(layout) = self.transitions.finish(generation, &mut self.dataset, &mut self.batches) {
                    self.lod.reindex(&mut self.dataset, &mut self.batches);
                    info!("Layout `{}` settled", layout);
                    events.push(Event::LayoutChanged(layout));
                }
            }
        }
    }

    fn push_load_event(event: LoadEvent, events: &mut Vec<Event>) {
        match event {
            LoadEvent::Progress(percent) => events.push(Event::LoadProgress(percent)),
            LoadEvent::Failed { atlas, reason } => events.push(Event::StreamingFailed { atlas, reason }),
            // Ready is emitted once per tick from the loaded texture count
            LoadEvent::TextureLoaded(_) | LoadEvent::Ready => {}
        }
    }

    fn spawn_lod_fetch(&self, cell: usize) {
        let Some(item) = self.dataset.cells.get(cell) else {
            return;
        };
        let path = self.manifest.lod_path(&item.name);
        let policy = self.policy;
        let sender = self.sender.clone();
        trace!("Fetching high-res image for cell {} from {:?}", cell, path);
        self.handle.spawn(async move {
            let completion = match fetch_with_retry(&path, policy, None, |_| {}).await {
                Ok(image) => Completion::LodFetched { cell, image },
                Err(e) => Completion::LodFailed {
                    cell,
                    reason: e.to_string(),
                },
            };
            let _ = sender.send(completion);
        });
    }

    pub fn handle_command(&mut self, command: Command, picker: Option<&mut dyn Picker>) -> Option<Event> {
        match command {
            Command::ChangeLayout(name) => {
                if let Err(e) = self.transitions.transition_layout(
                    &name,
                    &mut self.dataset,
                    &mut self.batches,
                    &self.handle,
                    &self.sender,
                ) {
                    warn!("Cannot change layout: {}", e);
                }
                None
            }
            Command::FlyTo(target) => {
                self.transitions.fly_to(&self.camera, target);
                None
            }
            Command::Pick { x, y } => {
                let Some(picker) = picker else {
                    warn!("Picking needs a render surface");
                    return Some(Event::Picked(None));
                };
                let picked = match picker.pick(x, y) {
                    Some(cell) => match self.dataset.cells.get(cell) {
                        Some(item) => {
                            info!("Picked cell {} ({})", cell, item.name);
                            Some(cell)
                        }
                        None => {
                            warn!("Pick at ({}, {}) resolved to unknown cell {}", x, y, cell);
                            None
                        }
                    },
                    None => {
                        debug!("Pick at ({}, {}) hit nothing", x, y);
                        None
                    }
                };
                Some(Event::Picked(picked))
            }
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.camera.set_viewport(width, height);
    }

    /// Current value of the layout transition uniform.
    pub fn transition_percent(&self, now: Instant) -> f32 {
        self.transitions.percent(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::sample_json;
    use image::{Rgba, RgbaImage};
    use std::path::Path;

    struct FixedPicker(Option<usize>);

    impl Picker for FixedPicker {
        fn pick(&mut self, _x: u32, _y: u32) -> Option<usize> {
            self.0
        }
    }

    fn fast_config() -> Config {
        Config {
            max_fetch_retries: 1,
            retry_backoff: Duration::from_millis(1),
            transition_duration: Duration::from_millis(10),
            lod_texture_edge: 512,
            ..Config::default()
        }
    }

    /// 100 cells of 32px in 256px atlases => 2 atlases in one 512px texture.
    fn write_fixture(dir: &Path, atlases: usize) -> Manifest {
        let manifest_path = dir.join("manifest.json");
        std::fs::write(&manifest_path, sample_json(100)).unwrap();
        std::fs::create_dir_all(dir.join("atlases")).unwrap();
        for atlas in 0..atlases {
            RgbaImage::from_pixel(256, 256, Rgba([200, 100, 50, 255]))
                .save(dir.join("atlases").join(format!("atlas-{atlas}.png")))
                .unwrap();
        }
        Manifest::from_file(&manifest_path).unwrap()
    }

    fn caps() -> Capabilities {
        Capabilities::new(512, 16, u32::MAX).unwrap()
    }

    async fn run_until(ctx: &mut AppContext, mut done: impl FnMut(&[Event]) -> bool) -> Vec<Event> {
        let mut all = Vec::new();
        for _ in 0..500 {
            let events = ctx.tick(Instant::now());
            all.extend(events);
            if done(&all) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        all
    }

    #[tokio::test]
    async fn streams_to_ready_with_monotonic_progress() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_fixture(dir.path(), 2);
        let mut ctx = AppContext::new(manifest, fast_config(), &caps(), Handle::current()).unwrap();
        assert_eq!(ctx.dataset.texture_count(), 1);
        ctx.start();

        let events = run_until(&mut ctx, |events| events.contains(&Event::Ready)).await;
        assert!(ctx.is_ready());
        assert_eq!(events.iter().filter(|e| **e == Event::Ready).count(), 1);

        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                Event::LoadProgress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last(), Some(&100));
        assert!(ctx.loader.textures_mut()[0].take_upload().is_some());
    }

    #[tokio::test]
    async fn missing_atlas_surfaces_a_streaming_failure() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_fixture(dir.path(), 1);
        let mut ctx = AppContext::new(manifest, fast_config(), &caps(), Handle::current()).unwrap();
        ctx.start();

        let events = run_until(&mut ctx, |events| {
            events.iter().any(|e| matches!(e, Event::StreamingFailed { .. }))
        })
        .await;
        assert!(events.iter().any(|e| matches!(e, Event::StreamingFailed { atlas: 1, .. })));
        assert!(!ctx.is_ready());
        assert!(!events.contains(&Event::Ready));
    }

    #[tokio::test]
    async fn layout_change_settles_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_fixture(dir.path(), 2);
        let mut ctx = AppContext::new(manifest, fast_config(), &caps(), Handle::current()).unwrap();

        assert_eq!(ctx.handle_command(Command::ChangeLayout("grid".to_string()), None), None);
        assert!(ctx.transitions.is_transitioning());
        let events = run_until(&mut ctx, |events| {
            events.contains(&Event::LayoutChanged("grid".to_string()))
        })
        .await;
        assert!(events.contains(&Event::LayoutChanged("grid".to_string())));
        assert_eq!(ctx.dataset.current_layout(), "grid");
        assert_eq!(ctx.dataset.cells[7].position, ctx.dataset.cells[7].target);

        // unknown layouts are logged and ignored
        ctx.handle_command(Command::ChangeLayout("umap".to_string()), None);
        assert!(!ctx.transitions.is_transitioning());
    }

    #[tokio::test]
    async fn pick_goes_through_the_picker() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_fixture(dir.path(), 2);
        let mut ctx = AppContext::new(manifest, fast_config(), &caps(), Handle::current()).unwrap();

        let mut picker = FixedPicker(Some(42));
        let event = ctx.handle_command(Command::Pick { x: 3, y: 4 }, Some(&mut picker));
        assert_eq!(event, Some(Event::Picked(Some(42))));
        assert_eq!(ctx.handle_command(Command::Pick { x: 3, y: 4 }, None), Some(Event::Picked(None)));

        // ids past the dataset are a miss, not a panic
        let mut stray = FixedPicker(Some(100));
        let event = ctx.handle_command(Command::Pick { x: 3, y: 4 }, Some(&mut stray));
        assert_eq!(event, Some(Event::Picked(None)));
    }

    #[tokio::test]
    async fn lod_texture_respects_the_texture_limit() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_fixture(dir.path(), 2);
        let config = Config {
            lod_texture_edge: 4096,
            ..fast_config()
        };
        let small = Capabilities::new(2048, 16, u32::MAX).unwrap();
        let ctx = AppContext::new(manifest, config, &small, Handle::current()).unwrap();
        assert!(ctx.lod.lod_edge() <= 2048);
        assert_eq!(ctx.lod.lod_edge() % 128, 0);
    }

    #[test]
    fn inconsistent_sizes_abort_construction() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let mut manifest = Manifest::from_str(&sample_json(10)).unwrap();
        manifest.sizes.atlas = 250;
        let result = AppContext::new(manifest, Config::default(), &caps(), runtime.handle().clone());
        assert!(matches!(result, Err(e) if e.is_fatal()));
    }
}
