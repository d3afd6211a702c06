use crate::{
    error::VectorError,
    item::Item,
    payload::TilePayload,
    registry::ItemRegistry,
    tile_data::{TileData, TileItem},
};
use bevy_ecs::prelude::*;
use bevy_log::{debug, warn};
use bevy_platform::collections::HashMap;
use itertools::Itertools;
use waw_surface::{
    data::{LayerId, TileTree},
    math::TileAddress,
};

/// What happened to an ingested payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The tile was not present before.
    Stored { items: usize },
    /// An older version of the tile was superseded.
    Replaced { previous: u32, items: usize },
    /// The same version is already stored, the payload was not decoded again.
    Duplicate,
    /// A newer version is already stored, the payload was discarded.
    Discarded { stored: u32 },
}

/// The vector tiles of one layer, keyed by their address.
#[derive(Debug)]
pub struct VectorTileStore {
    layer: LayerId,
    tiles: HashMap<TileAddress, TileData>,
    version_conflicts: u64,
}

impl VectorTileStore {
    pub fn new(layer: LayerId) -> Self {
        Self {
            layer,
            tiles: HashMap::default(),
            version_conflicts: 0,
        }
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, address: TileAddress) -> Option<&TileData> {
        self.tiles.get(&address)
    }

    /// The number of payloads discarded because a newer version was already stored.
    pub fn version_conflicts(&self) -> u64 {
        self.version_conflicts
    }

    /// Decodes a payload into the tile at `address`.
    ///
    /// Every feature is resolved against the registry and appended in payload order. A payload
    /// older than the stored tile is discarded as a whole.
    pub fn ingest(
        &mut self,
        address: TileAddress,
        payload: TilePayload,
        registry: &mut ItemRegistry,
    ) -> Result<IngestOutcome, VectorError> {
        if payload.address() != address {
            return Err(VectorError::AddressMismatch {
                address,
                payload: payload.address(),
            });
        }

        let previous = self.tiles.get(&address).map(TileData::version);

        match previous {
            Some(stored) if stored > payload.version() => {
                self.version_conflicts += 1;
                debug!(
                    "Discarding version {} of vector tile {address}, version {stored} is already stored.",
                    payload.version()
                );
                return Ok(IngestOutcome::Discarded { stored });
            }
            Some(stored) if stored == payload.version() => return Ok(IngestOutcome::Duplicate),
            _ => {}
        }

        let mut tile_data = TileData {
            address,
            layer: self.layer,
            bbox: payload.bbox,
            is_generalized: payload.is_generalized,
            version: payload.v,
            level: payload.level,
            span: payload.span,
            tile_items: Vec::with_capacity(payload.values.len()),
        };

        for feature in payload.values {
            let (key, _) = registry.resolve(self.layer, &feature);
            tile_data.add_tile_item(key, feature.geometry);
        }

        let items = tile_data.len();
        self.tiles.insert(address, tile_data);

        Ok(match previous {
            Some(previous) => IngestOutcome::Replaced { previous, items },
            None => IngestOutcome::Stored { items },
        })
    }

    /// Drops a tile, for example after it left the tile tree.
    pub fn release(&mut self, address: TileAddress) -> Option<TileData> {
        self.tiles.remove(&address)
    }

    /// Resolves a tile item against the registry.
    pub fn resolve<'a>(&self, tile_item: &TileItem, registry: &'a ItemRegistry) -> Result<&'a Item, VectorError> {
        registry
            .get(tile_item.item())
            .ok_or(VectorError::RegistryMismatch {
                address: tile_item.tile(),
                index: tile_item.index(),
                id: tile_item.item().id(),
            })
    }

    /// The items of a tile in payload order. Occurrences whose item is no longer registered
    /// are skipped.
    pub fn items<'a>(
        &'a self,
        address: TileAddress,
        registry: &'a ItemRegistry,
    ) -> Vec<(&'a TileItem, &'a Item)> {
        let Some(tile_data) = self.tiles.get(&address) else {
            return Vec::new();
        };

        tile_data
            .tile_items()
            .iter()
            .filter_map(|tile_item| match self.resolve(tile_item, registry) {
                Ok(item) => Some((tile_item, item)),
                Err(error) => {
                    warn!("{error}");
                    None
                }
            })
            .collect_vec()
    }

    /// Removes every occurrence whose item is no longer registered. Returns how many were
    /// removed.
    pub fn prune(&mut self, registry: &ItemRegistry) -> usize {
        self.tiles
            .values_mut()
            .map(|tile_data| tile_data.retain_tile_items(|tile_item| registry.contains(tile_item.item())))
            .sum()
    }
}

/// The vector layers of a surface, stored next to its [`TileTree`].
#[derive(Component, Default)]
pub struct VectorTiles {
    stores: HashMap<LayerId, VectorTileStore>,
}

impl VectorTiles {
    pub fn store(&self, layer: LayerId) -> Option<&VectorTileStore> {
        self.stores.get(&layer)
    }

    pub fn store_mut(&mut self, layer: LayerId) -> &mut VectorTileStore {
        self.stores
            .entry(layer)
            .or_insert_with(|| VectorTileStore::new(layer))
    }

    pub fn stores(&self) -> impl Iterator<Item = &VectorTileStore> {
        self.stores.values()
    }

    pub fn release(&mut self, address: TileAddress) {
        for store in self.stores.values_mut() {
            store.release(address);
        }
    }

    /// Drops the vector tiles of every tile that left the tile tree this frame.
    pub(crate) fn release_tiles(mut surfaces: Query<(&TileTree, &mut VectorTiles)>) {
        for (tile_tree, mut vector_tiles) in &mut surfaces {
            for &address in tile_tree.released_tiles() {
                vector_tiles.release(address);
            }
        }
    }
}
