use crate::data::{TileTree, finish_loading, start_loading};
use bevy_app::prelude::*;
use bevy_ecs::prelude::*;

#[derive(Resource)]
pub struct SurfaceSettings {
    /// How many tile images a [`DefaultLoader`](crate::data::DefaultLoader) loads at once.
    pub max_loading: usize,
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self { max_loading: 32 }
    }
}

/// The plugin for the surface texture cache.
///
/// Requires the asset and image plugins, which are part of bevy's default plugins.
pub struct SurfacePlugin;

impl Plugin for SurfacePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SurfaceSettings>().add_systems(
            PostUpdate,
            (
                TileTree::update,
                finish_loading,
                TileTree::apply_completions,
                TileTree::request_tiles,
                start_loading,
            )
                .chain(),
        );
    }
}
