use crate::{data::LayerId, math::TileAddress};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("tile {0} is not part of the tile tree")]
    UnknownTile(TileAddress),
    #[error("tile {0} is already part of the tile tree")]
    TileExists(TileAddress),
    #[error("tile {0} can not be subdivided past level {1}")]
    MaxLevel(TileAddress, u32),
    #[error("layer {0} is not registered with the tile tree")]
    UnknownLayer(LayerId),
    #[error("layer {0} is already registered with the tile tree")]
    LayerExists(LayerId),
    #[error("failed to access the surface config")]
    Io(#[from] std::io::Error),
    #[error("failed to parse the surface config")]
    Config(#[from] ron::error::SpannedError),
    #[error("failed to encode the surface config")]
    Encode(#[from] ron::Error),
}

/// Reported by a [`LayerLoader`](crate::data::LayerLoader) when a tile image could not be produced.
///
/// A failed load is never fatal. The material keeps any texture it had before and the
/// tile keeps falling back to its ancestors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    #[error("failed to fetch {path}: {reason}")]
    Fetch { path: String, reason: String },
    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("asset {path} failed to load")]
    Unavailable { path: String },
}
