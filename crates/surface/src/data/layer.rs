use crate::math::TileAddress;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// Identifies a layer of the surface. Each tile holds at most one material per layer.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u32);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// Raster tiles, one image per tile.
    #[default]
    Imagery,
    /// Vector tiles, rasterized per tile after their features have been indexed.
    Vector,
}

/// Configures a layer.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LayerConfig {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    /// The directory of the layer relative to the surface path.
    pub path: String,
    pub extension: String,
    /// The coarsest level that has data for this layer.
    pub min_level: u32,
    /// The finest level that has data for this layer. Finer tiles fall back to their ancestors.
    pub max_level: u32,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            id: LayerId::default(),
            name: "imagery".to_string(),
            kind: LayerKind::Imagery,
            path: "imagery".to_string(),
            extension: "png".to_string(),
            min_level: 0,
            max_level: u32::MAX,
        }
    }
}

/// A layer of a [`TileTree`](super::TileTree).
#[derive(Clone, Debug)]
pub struct Layer {
    pub(crate) id: LayerId,
    pub(crate) kind: LayerKind,
    pub(crate) path: PathBuf,
    pub(crate) extension: String,
    pub(crate) min_level: u32,
    pub(crate) max_level: u32,
    /// Bumped whenever the layer is restyled, so that pending loads of the old style are superseded.
    pub(crate) revision: u32,
}

impl Layer {
    pub(crate) fn new(config: &LayerConfig, root: &Path) -> Self {
        Self {
            id: config.id,
            kind: config.kind,
            path: root.join(&config.path),
            extension: config.extension.clone(),
            min_level: config.min_level,
            max_level: config.max_level,
            revision: 0,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Whether tiles at this address get their own material for this layer.
    pub fn covers(&self, address: TileAddress) -> bool {
        (self.min_level..=self.max_level).contains(&address.level)
    }

    pub(crate) fn source(&self, address: TileAddress) -> LoadSource {
        LoadSource {
            path: address.path(&self.path, &self.extension),
            revision: self.revision,
        }
    }
}

/// What a material is loading. Two requests for the same tile differ in their source when the
/// layer was restyled in between.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LoadSource {
    pub path: PathBuf,
    pub revision: u32,
}
