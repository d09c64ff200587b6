/// Manifest produced by the upstream data preparation step.
///
/// The manifest is a JSON document describing the cell count, per-cell thumbnail
/// sizes, image names, named 2D layouts and where the atlas / LOD thumbnail files live.
/// Relative paths are resolved against the directory that holds the manifest.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Manifest {
    pub cell_count: usize,
    pub images: Vec<String>,
    /// `[width, height]` of each low-resolution thumbnail, in pixels.
    pub cell_sizes: Vec<[u32; 2]>,
    #[serde(default)]
    pub sizes: Sizes,
    #[serde(default = "default_atlas_dir")]
    pub atlas_dir: PathBuf,
    #[serde(default = "default_atlas_pattern")]
    pub atlas_pattern: String,
    #[serde(default = "default_lod_dir")]
    pub lod_dir: PathBuf,
    pub layouts: BTreeMap<String, LayoutSource>,

    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Sizes {
    /// Low-resolution cell edge inside atlases.
    #[serde(default = "default_cell_size")]
    pub cell: u32,
    /// High-resolution slot edge inside the LOD texture.
    #[serde(default = "default_lod_size")]
    pub lod: u32,
    /// Atlas image edge.
    #[serde(default = "default_atlas_size")]
    pub atlas: u32,
}

/// A layout is either inline `[[x, y], ...]` or a path to a JSON file holding that array.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum LayoutSource {
    Inline(Vec<[f32; 2]>),
    File(PathBuf),
}

fn default_cell_size() -> u32 {
    32
}

fn default_lod_size() -> u32 {
    128
}

fn default_atlas_size() -> u32 {
    2048
}

fn default_atlas_dir() -> PathBuf {
    PathBuf::from("atlases")
}

fn default_atlas_pattern() -> String {
    "atlas-{index}.png".to_string()
}

fn default_lod_dir() -> PathBuf {
    PathBuf::from("thumbs")
}

impl Default for Sizes {
    fn default() -> Self {
        Self {
            cell: default_cell_size(),
            lod: default_lod_size(),
            atlas: default_atlas_size(),
        }
    }
}

impl Manifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut manifest = Self::from_str(&content)?;
        manifest.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        info!("Loaded manifest {:?} with {} cells", path, manifest.cell_count);
        Ok(manifest)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.cell_count == 0 {
            return Err(Error::config("manifest declares zero cells"));
        }
        if self.images.len() != self.cell_count {
            return Err(Error::config(format!(
                "manifest declares {} cells but lists {} images",
                self.cell_count,
                self.images.len()
            )));
        }
        if self.cell_sizes.len() != self.cell_count {
            return Err(Error::config(format!(
                "manifest declares {} cells but lists {} thumbnail sizes",
                self.cell_count,
                self.cell_sizes.len()
            )));
        }
        if !self.layouts.contains_key("scatter") {
            return Err(Error::config("manifest has no `scatter` layout"));
        }
        Ok(())
    }

    pub fn atlas_path(&self, index: usize) -> PathBuf {
        let file = self.atlas_pattern.replace("{index}", &index.to_string());
        self.base_dir.join(&self.atlas_dir).join(file)
    }

    pub fn lod_path(&self, image: &str) -> PathBuf {
        self.base_dir.join(&self.lod_dir).join(image)
    }

    pub fn layout_names(&self) -> impl Iterator<Item = &str> {
        self.layouts.keys().map(String::as_str)
    }

    /// Raw coordinates of a named layout, loading the file when the layout is external.
    pub fn resolve_layout(&self, name: &str) -> Result<Vec<[f32; 2]>> {
        let source = self
            .layouts
            .get(name)
            .ok_or_else(|| Error::config(format!("unknown layout `{name}`")))?;

        let positions = match source {
            LayoutSource::Inline(positions) => positions.clone(),
            LayoutSource::File(path) => {
                let path = self.base_dir.join(path);
                debug!("Reading layout `{}` from {:?}", name, path);
                let content = std::fs::read_to_string(&path)?;
                serde_json::from_str(&content)?
            }
        };

        if positions.len() != self.cell_count {
            return Err(Error::config(format!(
                "layout `{name}` has {} positions for {} cells",
                positions.len(),
                self.cell_count
            )));
        }
        Ok(positions)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_json(cell_count: usize) -> String {
        let images: Vec<String> = (0..cell_count).map(|i| format!("img-{i}.jpg")).collect();
        let sizes: Vec<[u32; 2]> = (0..cell_count).map(|i| [32, 16 + (i as u32 % 16)]).collect();
        let scatter: Vec<[f32; 2]> = (0..cell_count)
            .map(|i| [i as f32, (cell_count - i) as f32])
            .collect();
        serde_json::json!({
            "cell_count": cell_count,
            "images": images,
            "cell_sizes": sizes,
            "sizes": { "cell": 32, "lod": 128, "atlas": 256 },
            "layouts": { "scatter": scatter }
        })
        .to_string()
    }

    #[test]
    fn parses_inline_layouts_with_defaults() {
        let manifest = Manifest::from_str(&sample_json(10)).unwrap();
        assert_eq!(manifest.cell_count, 10);
        assert_eq!(manifest.sizes.atlas, 256);
        assert_eq!(manifest.atlas_pattern, "atlas-{index}.png");
        assert_eq!(manifest.resolve_layout("scatter").unwrap().len(), 10);
        assert!(manifest.resolve_layout("umap").is_err());
        assert!(manifest.atlas_path(3).ends_with("atlases/atlas-3.png"));
        assert!(manifest.lod_path("img-1.jpg").ends_with("thumbs/img-1.jpg"));
    }

    #[test]
    fn rejects_inconsistent_totals() {
        let mut value: serde_json::Value = serde_json::from_str(&sample_json(4)).unwrap();
        value["cell_count"] = serde_json::json!(5);
        let err = Manifest::from_str(&value.to_string()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn reads_layout_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&sample_json(2)).unwrap();
        value["layouts"]["umap"] = serde_json::json!("umap.json");
        std::fs::write(dir.path().join("umap.json"), "[[0.5, 0.5], [-0.5, 1.0]]").unwrap();
        let manifest_path = dir.path().join("manifest.json");
        std::fs::write(&manifest_path, value.to_string()).unwrap();

        let manifest = Manifest::from_file(&manifest_path).unwrap();
        assert_eq!(manifest.resolve_layout("umap").unwrap()[1], [-0.5, 1.0]);
    }
}
