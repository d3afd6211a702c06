use crate::{
    error::VectorError,
    item::{AttributeValue, Item, ItemId},
    payload::RawFeature,
};
use bevy_ecs::prelude::*;
use bevy_platform::collections::HashMap;
use slab::Slab;
use waw_surface::data::LayerId;

/// Non-owning reference to a registry entry. The entry is not guaranteed to be present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ItemKey {
    slot: usize,
    id: ItemId,
}

impl ItemKey {
    pub fn id(self) -> ItemId {
        self.id
    }
}

/// Raised whenever an item is created or changed, so that geometry already drawn can be
/// restyled in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemChange {
    pub id: ItemId,
    pub version: i64,
}

/// How a feature was resolved against the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Created,
    /// The registered item was older and took over the feature's attributes and style.
    Updated,
    /// The registered item was at least as recent and was left untouched.
    Reused,
}

/// The canonical store of vector features, shared by every vector tile of the session.
///
/// Each [`ItemId`] maps to at most one [`Item`]. Tiles only hold [`ItemKey`]s, so any change
/// made here is immediately visible through all of them.
#[derive(Resource, Default)]
pub struct ItemRegistry {
    items: Slab<Item>,
    by_id: HashMap<ItemId, usize>,
    changes: Vec<ItemChange>,
    removals: Vec<ItemId>,
}

impl ItemRegistry {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn key(&self, id: ItemId) -> Option<ItemKey> {
        self.by_id.get(&id).map(|&slot| ItemKey { slot, id })
    }

    pub fn get(&self, key: ItemKey) -> Option<&Item> {
        self.items.get(key.slot).filter(|item| item.id == key.id)
    }

    pub fn get_by_id(&self, id: ItemId) -> Option<&Item> {
        self.get(self.key(id)?)
    }

    pub fn contains(&self, key: ItemKey) -> bool {
        self.get(key).is_some()
    }

    /// Finds or creates the item of a feature.
    ///
    /// An older registered item takes over the attributes of the feature and its version.
    /// Style overrides are replaced per layer: layers the feature carries a style for are
    /// overwritten, all other overrides are kept.
    pub fn resolve(&mut self, layer: LayerId, feature: &RawFeature) -> (ItemKey, Resolution) {
        let Some(key) = self.key(feature.id) else {
            let mut item = Item::new(feature.id).with_version(feature.version);
            item.attributes = feature.attributes.clone();
            item.style = feature.style.clone();
            item.layer = Some(layer);

            let slot = self.items.insert(item);
            self.by_id.insert(feature.id, slot);
            self.changes.push(ItemChange {
                id: feature.id,
                version: feature.version,
            });

            return (ItemKey { slot, id: feature.id }, Resolution::Created);
        };

        let item = &mut self.items[key.slot];

        if item.version >= feature.version {
            return (key, Resolution::Reused);
        }

        item.version = feature.version;
        item.attributes = feature.attributes.clone();
        item.style
            .extend(feature.style.iter().map(|(&layer, style)| (layer, style.clone())));

        self.changes.push(ItemChange {
            id: item.id,
            version: item.version,
        });

        (key, Resolution::Updated)
    }

    /// Sets an attribute of a registered item, without changing its version.
    pub fn set_attribute(
        &mut self,
        key: ItemKey,
        name: impl Into<String>,
        value: AttributeValue,
    ) -> Result<(), VectorError> {
        let item = self
            .items
            .get_mut(key.slot)
            .filter(|item| item.id == key.id)
            .ok_or(VectorError::UnknownItem(key.id))?;

        item.attributes.insert(name.into(), value);
        self.changes.push(ItemChange {
            id: item.id,
            version: item.version,
        });

        Ok(())
    }

    /// Removes an item and records its id in [`removals`](Self::removals), so that geometry
    /// drawn for it can be dropped. Tiles still referencing it drop their occurrences when pruned.
    pub fn remove(&mut self, id: ItemId) -> Option<Item> {
        let slot = self.by_id.remove(&id)?;
        self.removals.push(id);
        Some(self.items.remove(slot))
    }

    /// The changes raised since they were last cleared.
    pub fn changes(&self) -> &[ItemChange] {
        &self.changes
    }

    pub fn drain_changes(&mut self) -> impl Iterator<Item = ItemChange> + '_ {
        self.changes.drain(..)
    }

    /// The items removed since the changes were last cleared.
    pub fn removals(&self) -> &[ItemId] {
        &self.removals
    }

    pub fn drain_removals(&mut self) -> impl Iterator<Item = ItemId> + '_ {
        self.removals.drain(..)
    }

    pub(crate) fn clear_changes(mut registry: ResMut<ItemRegistry>) {
        registry.changes.clear();
        registry.removals.clear();
    }
}
