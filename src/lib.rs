pub mod addressing;
pub mod atlas;
pub mod capabilities;
pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod lod;
pub mod manifest;
pub mod message;
pub mod picking;
pub mod render;
pub mod settings;
pub mod transition;
pub mod utils;

pub use context::{AppContext, Picker};
pub use error::{Error, Result};
