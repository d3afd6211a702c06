use crate::{data::LayerConfig, error::SurfaceError, math::TileAddress};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Describes a surface: where its tiles live, how deep the quadtree goes and which layers
/// texture it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SurfaceConfig {
    /// The asset directory containing one subdirectory per layer.
    pub path: String,
    pub max_level: u32,
    /// The tiles the quadtree starts from.
    pub roots: Vec<TileAddress>,
    pub layers: Vec<LayerConfig>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            path: "surface".to_string(),
            max_level: 18,
            roots: vec![TileAddress::new(0, 0, 0)],
            layers: Vec::new(),
        }
    }
}

impl SurfaceConfig {
    pub fn add_layer(&mut self, layer: LayerConfig) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, SurfaceError> {
        let encoded = fs::read_to_string(path)?;
        Ok(ron::from_str(&encoded)?)
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SurfaceError> {
        let encoded = ron::ser::to_string_pretty(self, Default::default())?;
        Ok(fs::write(path, encoded)?)
    }
}
