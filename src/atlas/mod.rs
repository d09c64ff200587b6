pub mod loader;
pub mod progress;
pub mod texture;

pub use loader::{LoadEvent, RetryPolicy, StreamingLoader};
pub use texture::Texture;
