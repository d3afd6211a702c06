//! This module contains the texture cache of the surface: the [`TileTree`] and the
//! [`Material`]s of its tiles.
//!
//! # Explanation
//! Each surface possesses one [`TileTree`], the quadtree of tiles currently selected by the LOD
//! selector. Every tile holds one [`Material`] per [`Layer`] covering its level, which tracks
//! the loading state of the tile's imagery for that layer.
//!
//! The imagery itself is fetched by a [`LayerLoader`]. Materials only issue and cancel
//! requests, tagging each with a [`RequestToken`], and apply the results handed back to the
//! tree. Until a tile's own imagery arrives the tree resolves the texture of its closest
//! loaded ancestor.

mod layer;
mod material;
mod texture;
mod tile_loader;
mod tile_tree;

pub use self::{
    layer::{Layer, LayerConfig, LayerId, LayerKind, LoadSource},
    material::{ApplyOutcome, Material, MaterialFlags, MaterialState},
    texture::{DisplayTexture, TileTexture},
    tile_loader::{
        DefaultLoader, LayerLoader, LoadCompletion, LoadRequest, LoadResult, RequestToken, TileImage,
        finish_loading,
        start_loading,
    },
    tile_tree::{LodChange, TileNode, TileTree},
};
