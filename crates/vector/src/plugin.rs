use crate::{registry::ItemRegistry, store::VectorTiles};
use bevy_app::prelude::*;
use bevy_ecs::prelude::*;
use waw_surface::data::TileTree;

/// The plugin for vector tiles and their shared item registry.
///
/// Vector tiles follow the lifetime of the tiles of their [`TileTree`], so this plugin is meant
/// to be added next to the [`SurfacePlugin`](waw_surface::plugin::SurfacePlugin).
pub struct VectorPlugin;

impl Plugin for VectorPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ItemRegistry>()
            .add_systems(First, ItemRegistry::clear_changes)
            .add_systems(PostUpdate, VectorTiles::release_tiles.after(TileTree::update));
    }
}
