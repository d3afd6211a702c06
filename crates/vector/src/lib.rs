pub mod error;
pub mod item;
pub mod payload;
pub mod plugin;
pub mod registry;
pub mod store;
pub mod tile_data;

#[doc(hidden)]
pub mod prelude {
    pub use crate::{
        error::VectorError,
        item::{AttributeValue, Attributes, Item, ItemId, ItemStyle, UNVERSIONED},
        payload::{Extent, Geometry, RawFeature, TilePayload},
        plugin::VectorPlugin,
        registry::{ItemChange, ItemKey, ItemRegistry, Resolution},
        store::{IngestOutcome, VectorTileStore, VectorTiles},
        tile_data::{TileData, TileItem},
    };
}
