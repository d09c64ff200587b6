use std::time::Duration;

use crate::settings::UserSettings;

// Default values for configuration
// These serve as fallback values when the settings file omits a key
pub const DEFAULT_WINDOW_WIDTH: u32 = 1280;
pub const DEFAULT_WINDOW_HEIGHT: u32 = 800;
pub const DEFAULT_TEXTURE_EDGE_CAP: u32 = 4096;
pub const DEFAULT_LOD_TEXTURE_EDGE: u32 = 4096;
pub const DEFAULT_LOD_RADIUS: u32 = 2;
pub const DEFAULT_LOD_FLUSH_INTERVAL: u64 = 40;         // frames
pub const DEFAULT_LOD_MIN_CAMERA_Z: f32 = 250.0;
pub const DEFAULT_LOD_BUCKET_FRACTION: f32 = 0.1;
pub const DEFAULT_LAYOUT_SPREAD: f32 = 1000.0;
pub const DEFAULT_POINT_SCALE: f32 = 12.0;
pub const DEFAULT_MAX_FETCH_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 250;
pub const DEFAULT_TRANSITION_DURATION_MS: u64 = 1500;
pub const DEFAULT_FLY_DURATION_MS: u64 = 1200;
pub const DEFAULT_RESIZE_DEBOUNCE_MS: u64 = 150;

/// Runtime configuration, built once at start-up and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub window_width: u32,
    pub window_height: u32,
    pub texture_edge_cap: u32,          // Caps the composited texture edge below the GPU limit
    pub lod_texture_edge: u32,          // Edge of the shared high-res LOD texture
    pub lod_radius: u32,                // Manhattan radius of resident buckets
    pub lod_flush_interval: u64,        // Frames between LOD flushes
    pub lod_min_camera_z: f32,          // Camera depth that enables LOD loading
    pub lod_bucket_fraction: f32,       // Bucket height as a fraction of the layout spread
    pub layout_spread: f32,             // Layouts are scaled into [-spread, spread]
    pub point_scale: f32,               // World size of a point sprite
    pub max_fetch_retries: u32,
    pub retry_backoff: Duration,
    pub transition_duration: Duration,
    pub fly_duration: Duration,
    pub resize_debounce: Duration,
}

impl Config {
    pub fn from_settings(settings: &UserSettings) -> Self {
        Self {
            window_width: settings.window_width,
            window_height: settings.window_height,
            texture_edge_cap: settings.texture_edge_cap,
            lod_texture_edge: settings.lod_texture_edge,
            lod_radius: settings.lod_radius,
            lod_flush_interval: settings.lod_flush_interval.max(1),
            lod_min_camera_z: settings.lod_min_camera_z,
            lod_bucket_fraction: settings.lod_bucket_fraction,
            layout_spread: settings.layout_spread,
            point_scale: settings.point_scale,
            max_fetch_retries: settings.max_fetch_retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            transition_duration: Duration::from_millis(settings.transition_duration_ms),
            fly_duration: Duration::from_millis(settings.fly_duration_ms),
            resize_debounce: Duration::from_millis(settings.resize_debounce_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_settings(&UserSettings::default())
    }
}
