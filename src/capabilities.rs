use iced_wgpu::wgpu;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::error::{Error, Result};

/// Numeric limits of the graphics context that shape texture packing and batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub max_texture_edge: u32,
    pub max_bound_texture_units: u32,
    pub max_indexed_vertices: u32,
}

impl Capabilities {
    pub fn new(max_texture_edge: u32, max_bound_texture_units: u32, max_indexed_vertices: u32) -> Result<Self> {
        let caps = Self {
            max_texture_edge,
            max_bound_texture_units,
            max_indexed_vertices,
        };
        caps.validate()?;
        Ok(caps)
    }

    /// Reads the limits a wgpu device was created with.
    pub fn from_limits(limits: &wgpu::Limits) -> Result<Self> {
        // Point sprites are drawn instanced from per-attribute buffers, so the
        // largest f32x3 buffer bounds how many instances one draw can address.
        let per_buffer = limits.max_buffer_size / (3 * std::mem::size_of::<f32>() as u64);
        let max_indexed_vertices = per_buffer.min(u32::MAX as u64) as u32;

        let caps = Self::new(
            limits.max_texture_dimension_2d,
            limits.max_sampled_textures_per_shader_stage,
            max_indexed_vertices,
        )?;
        info!(
            "Capabilities: max_texture_edge={}, max_bound_texture_units={}, max_indexed_vertices={}",
            caps.max_texture_edge, caps.max_bound_texture_units, caps.max_indexed_vertices
        );
        Ok(caps)
    }

    fn validate(&self) -> Result<()> {
        if self.max_texture_edge == 0 || self.max_indexed_vertices == 0 {
            return Err(Error::config("no usable graphics context"));
        }
        // One unit is always reserved for the shared LOD texture.
        if self.max_bound_texture_units < 2 {
            return Err(Error::config(format!(
                "at least 2 bound texture units are required, the context reports {}",
                self.max_bound_texture_units
            )));
        }
        Ok(())
    }

    /// Texture units left for atlas textures once the LOD texture is bound.
    pub fn atlas_texture_units(&self) -> u32 {
        self.max_bound_texture_units - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_context() {
        assert!(Capabilities::new(0, 16, 65536).is_err());
        assert!(Capabilities::new(4096, 1, 65536).is_err());
        let caps = Capabilities::new(4096, 16, 65536).unwrap();
        assert_eq!(caps.atlas_texture_units(), 15);
    }

    #[test]
    fn reads_wgpu_defaults() {
        let caps = Capabilities::from_limits(&wgpu::Limits::default()).unwrap();
        assert_eq!(caps.max_texture_edge, 8192);
        assert_eq!(caps.max_bound_texture_units, 16);
        assert!(caps.max_indexed_vertices > 0);
    }
}
