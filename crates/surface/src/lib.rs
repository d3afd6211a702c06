pub mod data;
pub mod error;
pub mod math;
pub mod plugin;
pub mod surface;

#[doc(hidden)]
pub mod prelude {
    pub use crate::{
        data::{
            ApplyOutcome, DefaultLoader, DisplayTexture, LayerConfig, LayerId, LayerKind, LayerLoader, LoadCompletion,
            LoadRequest, LodChange, Material, MaterialFlags, MaterialState, RequestToken, TileImage, TileTexture, TileTree,
        },
        error::{LoadFailure, SurfaceError},
        math::TileAddress,
        plugin::{SurfacePlugin, SurfaceSettings},
        surface::SurfaceConfig,
    };
}
