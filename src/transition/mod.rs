pub mod easing;
pub mod tween;

use std::time::{Duration, Instant};

use glam::Vec3;
use tokio::runtime::Handle;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::message::{Completion, CompletionSender};
use crate::render::batch::Batch;
use crate::render::camera::Camera;

use self::easing::EMPHASIZED;
use self::tween::Tween;

/// Drives layout transitions and camera flights.
///
/// A layout change writes the new targets into the batches once; the shader mixes
/// position and target with the `percent` uniform. Finalization is scheduled on the
/// runtime and arrives as `Completion::TransitionFinished`.
#[derive(Debug)]
pub struct TransitionController {
    duration: Duration,
    fly_duration: Duration,
    generation: u64,
    layout: Option<Tween<f32>>,
    flight: Option<Tween<Vec3>>,
}

impl TransitionController {
    pub fn new(duration: Duration, fly_duration: Duration) -> Self {
        Self {
            duration,
            fly_duration,
            generation: 0,
            layout: None,
            flight: None,
        }
    }

    pub fn is_transitioning(&self) -> bool {
        self.layout.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Value of the per-batch transition uniform.
    pub fn percent(&self, now: Instant) -> f32 {
        self.layout.as_ref().map_or(0.0, |tween| tween.value(now))
    }

    pub fn transition_layout(
        &mut self,
        name: &str,
        dataset: &mut Dataset,
        batches: &mut [Batch],
        handle: &Handle,
        sender: &CompletionSender,
    ) -> Result<u64> {
        self.begin(name, dataset, batches, Instant::now())?;

        let generation = self.generation;
        let duration = self.duration;
        let sender = sender.clone();
        handle.spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = sender.send(Completion::TransitionFinished { generation });
        });
        Ok(generation)
    }

    /// Sets new targets and restarts the tween. An interrupted transition is frozen
    /// where it stands so points do not jump.
    pub fn begin(&mut self, name: &str, dataset: &mut Dataset, batches: &mut [Batch], now: Instant) -> Result<()> {
        if dataset.layout_positions(name).is_none() {
            return Err(Error::config(format!("unknown layout `{name}`")));
        }
        if let Some(tween) = self.layout.take() {
            let t = tween.value(now);
            debug!("Interrupting transition at {:.2}", t);
            for cell in &mut dataset.cells {
                cell.position = cell.position.lerp(cell.target, t);
            }
            for batch in batches.iter_mut() {
                batch.sync_positions(dataset.draw_call_cells(batch.id));
            }
        }

        dataset.retarget(name)?;
        for batch in batches.iter_mut() {
            batch.sync_targets(dataset.draw_call_cells(batch.id));
        }
        self.generation += 1;
        self.layout = Some(Tween::starting_at(0.0, 1.0, self.duration, &*EMPHASIZED, now));
        info!("Transitioning to layout `{}` over {:?}", name, self.duration);
        Ok(())
    }

    /// Commits targets as positions. Stale generations (superseded transitions) are
    /// ignored. Returns the name of the layout that is now current.
    pub fn finish(&mut self, generation: u64, dataset: &mut Dataset, batches: &mut [Batch]) -> Option<String> {
        if generation != self.generation || self.layout.is_none() {
            debug!("Ignoring stale transition {}", generation);
            return None;
        }
        self.layout = None;
        dataset.settle();
        for batch in batches.iter_mut() {
            let cells = dataset.draw_call_cells(batch.id);
            batch.sync_positions(cells);
            batch.sync_targets(cells);
        }
        Some(dataset.current_layout().to_string())
    }

    pub fn fly_to(&mut self, camera: &Camera, to: Vec3) {
        debug!("Flying from {:?} to {:?}", camera.eye, to);
        self.flight = Some(Tween::new(camera.eye, to, self.fly_duration, &*EMPHASIZED));
    }

    /// Advances an active flight. Returns true while the camera is moving.
    pub fn update_camera(&mut self, camera: &mut Camera, now: Instant) -> bool {
        let Some(flight) = &self.flight else {
            return false;
        };
        camera.eye = flight.value(now);
        if flight.is_finished(now) {
            self.flight = None;
        }
        true
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
    use crate::render::batch::build_batches;

    fn setup() -> (Dataset, Vec<Batch>) {
        let manifest = Manifest::from_str(&sample_json(12)).unwrap();
        let layout = Layout::with_capacities(4, 4, 4, 5);
        let data = Dataset::new(&manifest, layout, &Config::default()).unwrap();
        let batches = build_batches(&data);
        (data, batches)
    }

    #[test]
    fn targets_are_written_immediately_positions_on_finish() {
        let (mut data, mut batches) = setup();
        let mut transitions = TransitionController::new(Duration::from_millis(100), Duration::from_millis(100));
        let start = Instant::now();

        transitions.begin("grid", &mut data, &mut batches, start).unwrap();
        let grid = data.layout_positions("grid").unwrap().to_vec();
        assert_eq!(batches[1].targets[0], grid[5].to_array());
        assert_ne!(batches[1].positions[0], grid[5].to_array());
        assert_eq!(transitions.percent(start), 0.0);
        assert_eq!(transitions.percent(start + Duration::from_millis(200)), 1.0);

        let finished = transitions.finish(transitions.generation(), &mut data, &mut batches);
        assert_eq!(finished.as_deref(), Some("grid"));
        assert_eq!(batches[1].positions[0], grid[5].to_array());
        assert_eq!(data.cells[5].position, grid[5]);
        assert!(!transitions.is_transitioning());
        assert_eq!(transitions.percent(start), 0.0);
    }

    #[test]
    fn superseded_transitions_are_ignored() {
        let (mut data, mut batches) = setup();
        let mut transitions = TransitionController::new(Duration::from_millis(100), Duration::from_millis(100));
        let start = Instant::now();
        transitions.begin("grid", &mut data, &mut batches, start).unwrap();
        let first = transitions.generation();
        transitions.begin("scatter", &mut data, &mut batches, start + Duration::from_millis(50)).unwrap();

        assert_eq!(transitions.finish(first, &mut data, &mut batches), None);
        assert!(transitions.is_transitioning());
        assert_eq!(
            transitions.finish(transitions.generation(), &mut data, &mut batches).as_deref(),
            Some("scatter")
        );
    }

    #[test]
    fn unknown_layout_is_rejected() {
        let (mut data, mut batches) = setup();
        let mut transitions = TransitionController::new(Duration::from_millis(100), Duration::from_millis(100));
        assert!(transitions.begin("umap", &mut data, &mut batches, Instant::now()).is_err());
        assert!(!transitions.is_transitioning());
    }

    #[test]
    fn flight_moves_the_camera_to_its_target() {
        let mut camera = Camera::new(1.0);
        let mut transitions = TransitionController::new(Duration::from_millis(100), Duration::ZERO);
        let target = Vec3::new(10.0, 20.0, 30.0);
        transitions.fly_to(&camera, target);
        assert!(transitions.update_camera(&mut camera, Instant::now()));
        assert_eq!(camera.eye, target);
        assert!(!transitions.update_camera(&mut camera, Instant::now()));
    }

    #[tokio::test]
    async fn finalization_is_scheduled() {
        let (mut data, mut batches) = setup();
        let mut transitions = TransitionController::new(Duration::from_millis(10), Duration::from_millis(10));
        let (sender, mut receiver) = completion_queue();
        let generation = transitions
            .transition_layout("grid", &mut data, &mut batches, &Handle::current(), &sender)
            .unwrap();

        match receiver.recv().await {
            Some(Completion::TransitionFinished { generation: g }) => assert_eq!(g, generation),
            other => panic!("unexpected completion {other:?}"),
        }
    }
}
