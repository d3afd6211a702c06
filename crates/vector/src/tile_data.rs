use crate::{
    payload::{Extent, Geometry},
    registry::ItemKey,
};
use waw_surface::{data::LayerId, math::TileAddress};

/// One occurrence of a feature inside a vector tile.
#[derive(Clone, Debug, PartialEq)]
pub struct TileItem {
    /// The tile this occurrence belongs to.
    tile: TileAddress,
    tile_version: u32,
    /// The position inside the tile, in payload order.
    index: usize,
    item: ItemKey,
    geometry: Geometry,
}

impl TileItem {
    pub fn tile(&self) -> TileAddress {
        self.tile
    }

    pub fn tile_version(&self) -> u32 {
        self.tile_version
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn item(&self) -> ItemKey {
        self.item
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
}

/// The decoded content of one vector tile at one version.
#[derive(Clone, Debug)]
pub struct TileData {
    pub(crate) address: TileAddress,
    pub(crate) layer: LayerId,
    pub(crate) bbox: Extent,
    pub(crate) is_generalized: bool,
    pub(crate) version: u32,
    pub(crate) level: u32,
    pub(crate) span: u32,
    pub(crate) tile_items: Vec<TileItem>,
}

impl TileData {
    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn bbox(&self) -> Extent {
        self.bbox
    }

    pub fn is_generalized(&self) -> bool {
        self.is_generalized
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn span(&self) -> u32 {
        self.span
    }

    pub fn tile_items(&self) -> &[TileItem] {
        &self.tile_items
    }

    pub fn len(&self) -> usize {
        self.tile_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tile_items.is_empty()
    }

    /// Appends an occurrence of an item, linking it back to this tile.
    pub fn add_tile_item(&mut self, item: ItemKey, geometry: Geometry) -> &TileItem {
        let index = self.tile_items.len();

        self.tile_items.push(TileItem {
            tile: self.address,
            tile_version: self.version,
            index,
            item,
            geometry,
        });

        &self.tile_items[index]
    }

    /// Drops the occurrences rejected by `keep`. The remaining ones are renumbered in order.
    pub(crate) fn retain_tile_items(&mut self, mut keep: impl FnMut(&TileItem) -> bool) -> usize {
        let before = self.tile_items.len();
        self.tile_items.retain(|tile_item| keep(tile_item));

        for (index, tile_item) in self.tile_items.iter_mut().enumerate() {
            tile_item.index = index;
        }

        before - self.tile_items.len()
    }
}
