pub mod batch;
pub mod camera;
pub mod picking_pass;
pub mod pipeline;
pub mod shader;

pub use batch::{build_batches, Batch, TexCoords};
pub use camera::Camera;
pub use picking_pass::PickingPass;
pub use pipeline::Renderer;
