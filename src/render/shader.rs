use std::fmt::Write;

// Instance attributes come from one buffer each, in this order.
pub const LOCATION_SELECTOR: u32 = 0;
pub const LOCATION_SIZE: u32 = 1;
pub const LOCATION_OFFSET: u32 = 2;
pub const LOCATION_POSITION: u32 = 3;
pub const LOCATION_TARGET: u32 = 4;
pub const LOCATION_COLOR: u32 = 5;

/// Binding of the shared LOD texture in the per-batch group; atlas textures follow it.
pub const LOD_BINDING: u32 = 1;
pub const FIRST_ATLAS_BINDING: u32 = 2;

const COMMON: &str = r#"
struct Camera {
    view_proj: mat4x4<f32>,
    point_scale: f32,
};

struct BatchUniform {
    first_texture: f32,
    transition: f32,
};

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var tex_sampler: sampler;
@group(1) @binding(0) var<uniform> batch: BatchUniform;

struct Instance {
    @location(0) selector: f32,
    @location(1) size: f32,
    @location(2) offset: vec2<f32>,
    @location(3) position: vec3<f32>,
    @location(4) target_position: vec3<f32>,
    @location(5) color: vec3<f32>,
};

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) @interpolate(flat) selector: f32,
    @location(2) color: vec3<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32, instance: Instance) -> VertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-0.5, -0.5),
        vec2<f32>(0.5, -0.5),
        vec2<f32>(0.5, 0.5),
        vec2<f32>(0.5, 0.5),
        vec2<f32>(-0.5, 0.5),
        vec2<f32>(-0.5, -0.5),
    );
    let corner = corners[vertex_index % 6u];
    let center = mix(instance.position, instance.target_position, batch.transition);
    let world = center + vec3<f32>(corner * camera.point_scale, 0.0);

    var out: VertexOutput;
    out.clip = camera.view_proj * vec4<f32>(world, 1.0);
    out.uv = instance.offset + vec2<f32>(corner.x + 0.5, 0.5 - corner.y) * instance.size;
    out.selector = instance.selector;
    out.color = instance.color;
    return out;
}
"#;

/// Main pass shader sampling `texture_units` atlas textures plus the LOD texture.
///
/// WGSL cannot index a binding array portably, so the atlas is picked with an
/// if-chain on the selector relative to the first bound texture.
pub fn main_shader(texture_units: u32) -> String {
    let mut src = String::from(COMMON);

    let _ = writeln!(src, "@group(1) @binding({LOD_BINDING}) var lod_texture: texture_2d<f32>;");
    for unit in 0..texture_units {
        let _ = writeln!(
            src,
            "@group(1) @binding({}) var atlas_{unit}: texture_2d<f32>;",
            FIRST_ATLAS_BINDING + unit
        );
    }

    src.push_str("\nfn sample_atlas(index: i32, uv: vec2<f32>) -> vec4<f32> {\n");
    for unit in 0..texture_units {
        let _ = writeln!(
            src,
            "    if (index == {unit}) {{ return textureSampleLevel(atlas_{unit}, tex_sampler, uv, 0.0); }}"
        );
    }
    src.push_str("    return vec4<f32>(0.0, 0.0, 0.0, 0.0);\n}\n");

    src.push_str(
        r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    var color: vec4<f32>;
    if (in.selector < 0.0) {
        color = textureSampleLevel(lod_texture, tex_sampler, in.uv, 0.0);
    } else {
        color = sample_atlas(i32(round(in.selector - batch.first_texture)), in.uv);
    }
    if (color.a < 0.01) {
        discard;
    }
    return color;
}
"#,
    );
    src
}

/// Color-only shader for the picking pass. Same vertex stage, no texture sampling.
///
/// The whole quad is written, so the transparent padding the main pass discards around
/// non-square thumbnails still resolves to that cell.
pub fn picking_shader() -> String {
    let mut src = String::from(COMMON);
    src.push_str(
        r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(in.color, 1.0);
}
"#,
    );
    src
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_one_texture_per_unit_plus_lod() {
        let src = main_shader(3);
        assert!(src.contains("@group(1) @binding(1) var lod_texture"));
        assert!(src.contains("@group(1) @binding(4) var atlas_2"));
        assert!(!src.contains("atlas_3"));
        assert_eq!(src.matches("if (index ==").count(), 3);
    }

    #[test]
    fn picking_never_samples() {
        let src = picking_shader();
        assert!(!src.contains("textureSample"));
        assert!(src.contains("fn vs_main"));
        assert!(src.contains("in.color"));
    }

    #[test]
    fn locations_match_the_instance_struct() {
        let src = main_shader(1);
        for (location, field) in [
            (LOCATION_SELECTOR, "selector"),
            (LOCATION_SIZE, "size"),
            (LOCATION_OFFSET, "offset"),
            (LOCATION_POSITION, "position"),
            (LOCATION_TARGET, "target_position"),
            (LOCATION_COLOR, "color"),
        ] {
            assert!(src.contains(&format!("@location({location}) {field}:")), "{field}");
        }
    }
}
