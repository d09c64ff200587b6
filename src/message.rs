use glam::Vec3;
use image::RgbaImage;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Results of asynchronous work, funneled back onto the render loop.
///
/// Producers are tokio tasks; the only consumer is `AppContext::tick`, which drains the
/// queue before touching any shared state.
#[derive(Debug)]
pub enum Completion {
    AtlasProgress { atlas: usize, percent: f32 },
    AtlasDecoded { atlas: usize, image: RgbaImage },
    AtlasFailed { atlas: usize, reason: String },
    LodFetched { cell: usize, image: RgbaImage },
    LodFailed { cell: usize, reason: String },
    TransitionFinished { generation: u64 },
}

pub type CompletionSender = UnboundedSender<Completion>;
pub type CompletionReceiver = UnboundedReceiver<Completion>;

pub fn completion_queue() -> (CompletionSender, CompletionReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Requests from the UI / CLI collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ChangeLayout(String),
    FlyTo(Vec3),
    /// Pointer released at the same physical pixel it was pressed on.
    Pick { x: u32, y: u32 },
}

/// Signals emitted towards the UI / CLI collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    LoadProgress(u8),
    Ready,
    LayoutChanged(String),
    Picked(Option<usize>),
    StreamingFailed { atlas: usize, reason: String },
}
