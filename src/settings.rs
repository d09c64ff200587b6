use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info, warn, error};

use crate::config;

/// User-specific settings read from `settings.yaml`. Every field falls back to the
/// compiled-in default when missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Upper bound for the composited texture edge, applied on top of the GPU limit
    #[serde(default = "default_texture_edge_cap")]
    pub texture_edge_cap: u32,

    /// Edge of the shared high-resolution LOD texture
    #[serde(default = "default_lod_texture_edge")]
    pub lod_texture_edge: u32,

    /// Manhattan radius (in buckets) kept resident around the camera
    #[serde(default = "default_lod_radius")]
    pub lod_radius: u32,

    /// Frames between two flushes of fetched LOD images
    #[serde(default = "default_lod_flush_interval")]
    pub lod_flush_interval: u64,

    /// Camera depth under which LOD loading starts
    #[serde(default = "default_lod_min_camera_z")]
    pub lod_min_camera_z: f32,

    /// Bucket height as a fraction of the layout spread; bucket width is twice that
    #[serde(default = "default_lod_bucket_fraction")]
    pub lod_bucket_fraction: f32,

    /// Half extent of the world the layouts are scaled into
    #[serde(default = "default_layout_spread")]
    pub layout_spread: f32,

    /// World size of one point sprite
    #[serde(default = "default_point_scale")]
    pub point_scale: f32,

    #[serde(default = "default_max_fetch_retries")]
    pub max_fetch_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_transition_duration_ms")]
    pub transition_duration_ms: u64,

    #[serde(default = "default_fly_duration_ms")]
    pub fly_duration_ms: u64,

    #[serde(default = "default_resize_debounce_ms")]
    pub resize_debounce_ms: u64,
}

fn default_window_width() -> u32 {
    config::DEFAULT_WINDOW_WIDTH
}

fn default_window_height() -> u32 {
    config::DEFAULT_WINDOW_HEIGHT
}

fn default_texture_edge_cap() -> u32 {
    config::DEFAULT_TEXTURE_EDGE_CAP
}

fn default_lod_texture_edge() -> u32 {
    config::DEFAULT_LOD_TEXTURE_EDGE
}

fn default_lod_radius() -> u32 {
    config::DEFAULT_LOD_RADIUS
}

fn default_lod_flush_interval() -> u64 {
    config::DEFAULT_LOD_FLUSH_INTERVAL
}

fn default_lod_min_camera_z() -> f32 {
    config::DEFAULT_LOD_MIN_CAMERA_Z
}

fn default_lod_bucket_fraction() -> f32 {
    config::DEFAULT_LOD_BUCKET_FRACTION
}

fn default_layout_spread() -> f32 {
    config::DEFAULT_LAYOUT_SPREAD
}

fn default_point_scale() -> f32 {
    config::DEFAULT_POINT_SCALE
}

fn default_max_fetch_retries() -> u32 {
    config::DEFAULT_MAX_FETCH_RETRIES
}

fn default_retry_backoff_ms() -> u64 {
    config::DEFAULT_RETRY_BACKOFF_MS
}

fn default_transition_duration_ms() -> u64 {
    config::DEFAULT_TRANSITION_DURATION_MS
}

fn default_fly_duration_ms() -> u64 {
    config::DEFAULT_FLY_DURATION_MS
}

fn default_resize_debounce_ms() -> u64 {
    config::DEFAULT_RESIZE_DEBOUNCE_MS
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            window_width: default_window_width(),
            window_height: default_window_height(),
            texture_edge_cap: default_texture_edge_cap(),
            lod_texture_edge: default_lod_texture_edge(),
            lod_radius: default_lod_radius(),
            lod_flush_interval: default_lod_flush_interval(),
            lod_min_camera_z: default_lod_min_camera_z(),
            lod_bucket_fraction: default_lod_bucket_fraction(),
            layout_spread: default_layout_spread(),
            point_scale: default_point_scale(),
            max_fetch_retries: default_max_fetch_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            transition_duration_ms: default_transition_duration_ms(),
            fly_duration_ms: default_fly_duration_ms(),
            resize_debounce_ms: default_resize_debounce_ms(),
        }
    }
}

impl UserSettings {
    /// Get the path to the settings file
    /// On macOS: ~/Library/Application Support/imagecloud/settings.yaml
    /// On Linux: ~/.config/imagecloud/settings.yaml
    /// On Windows: C:\Users\<user>\AppData\Roaming\imagecloud\settings.yaml
    pub fn settings_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."));

        config_dir.join("imagecloud").join("settings.yaml")
    }

    /// Load settings from the YAML file
    /// If custom_path is provided, uses that path; otherwise uses the default settings path
    pub fn load(custom_path: Option<&Path>) -> Self {
        let path = match custom_path {
            Some(p) => {
                info!("Using custom settings path: {:?}", p);
                p.to_path_buf()
            }
            None => Self::settings_path(),
        };

        if !path.exists() {
            info!("Settings file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                error!("Failed to parse settings file at {:?}: {}", path, e);
                warn!("Using default settings");
                Self::default()
            }),
            Err(e) => {
                error!("Failed to read settings file at {:?}: {}", path, e);
                warn!("Using default settings");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
        let settings = serde_yaml::from_str::<UserSettings>(contents)?;
        debug!("Settings: lod_radius={}, lod_flush_interval={}, texture_edge_cap={}, lod_texture_edge={}",
            settings.lod_radius, settings.lod_flush_interval, settings.texture_edge_cap, settings.lod_texture_edge);
        Ok(settings)
    }
}
