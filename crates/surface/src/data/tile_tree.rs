use crate::{
    data::{
        ApplyOutcome, DefaultLoader, DisplayTexture, Layer, LayerConfig, LayerId, LayerLoader, LoadCompletion,
        LoadRequest, Material, RequestToken, TileTexture, tile_loader::completion_channel,
    },
    error::SurfaceError,
    math::TileAddress,
    surface::SurfaceConfig,
};
use async_channel::{Receiver, Sender};
use bevy_asset::Assets;
use bevy_ecs::prelude::*;
use bevy_image::Image;
use bevy_log::{debug, warn};
use bevy_platform::collections::HashMap;
use std::{mem, path::PathBuf};

/// A change of the active tile set, decided by the LOD selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LodChange {
    /// Realize the four children of the tile.
    Subdivide(TileAddress),
    /// Remove every descendant of the tile.
    Merge(TileAddress),
    /// Remove the tile itself. Surviving children become roots.
    Evict(TileAddress),
}

/// A realized tile of a [`TileTree`].
#[derive(Debug)]
pub struct TileNode {
    address: TileAddress,
    parent: Option<TileAddress>,
    children: Vec<TileAddress>,
    materials: HashMap<LayerId, Material>,
}

impl TileNode {
    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn parent(&self) -> Option<TileAddress> {
        self.parent
    }

    pub fn children(&self) -> &[TileAddress] {
        &self.children
    }

    pub fn material(&self, layer: LayerId) -> Option<&Material> {
        self.materials.get(&layer)
    }

    pub fn materials(&self) -> impl Iterator<Item = &Material> {
        self.materials.values()
    }
}

/// The active quadtree of a surface and the texture state of its tiles.
///
/// Nodes are stored in an arena keyed by their [`TileAddress`], parent and child links are
/// addresses into that arena. Every node holds one [`Material`] per layer that covers its level.
///
/// The LOD selector queues [`LodChange`]s, which are applied once per frame. Afterwards the tree
/// requests the imagery of every material that has none and applies the results handed back
/// by its [`LayerLoader`]. While a tile's own imagery is missing, [`TileTree::display_texture`]
/// resolves the texture of the closest ancestor instead.
#[derive(Component)]
#[require(DefaultLoader)]
pub struct TileTree {
    nodes: HashMap<TileAddress, TileNode>,
    layers: Vec<Layer>,
    root: PathBuf,
    max_level: u32,
    next_token: u64,
    completions: Sender<LoadCompletion>,
    receiver: Receiver<LoadCompletion>,
    /// Changes requested by the LOD selector, applied during the next update.
    lod_changes: Vec<LodChange>,
    /// Tiles removed from the tree during the last update.
    pub(crate) released_tiles: Vec<TileAddress>,
    stale_completions: u64,
}

impl TileTree {
    pub fn new(config: &SurfaceConfig) -> Self {
        let root = PathBuf::from(&config.path);
        let (completions, receiver) = completion_channel();

        let mut tile_tree = Self {
            nodes: HashMap::default(),
            layers: config
                .layers
                .iter()
                .map(|layer| Layer::new(layer, &root))
                .collect(),
            root,
            max_level: config.max_level,
            next_token: 0,
            completions,
            receiver,
            lod_changes: Vec::new(),
            released_tiles: Vec::new(),
            stale_completions: 0,
        };

        for &address in &config.roots {
            if let Err(error) = tile_tree.insert_root(address) {
                warn!("Skipping root tile: {error}");
            }
        }

        tile_tree
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    pub fn contains(&self, address: TileAddress) -> bool {
        self.nodes.contains_key(&address)
    }

    pub fn node(&self, address: TileAddress) -> Option<&TileNode> {
        self.nodes.get(&address)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TileNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn material(&self, address: TileAddress, layer: LayerId) -> Option<&Material> {
        self.nodes.get(&address)?.material(layer)
    }

    /// Tiles that were removed from the tree during the last update.
    pub fn released_tiles(&self) -> &[TileAddress] {
        &self.released_tiles
    }

    /// The number of completions discarded because their request was aborted or superseded,
    /// or because their tile was no longer part of the tree.
    pub fn stale_completions(&self) -> u64 {
        self.stale_completions
    }

    pub fn queue(&mut self, change: LodChange) {
        self.lod_changes.push(change);
    }

    pub fn insert_root(&mut self, address: TileAddress) -> Result<(), SurfaceError> {
        if self.nodes.contains_key(&address) {
            return Err(SurfaceError::TileExists(address));
        }

        let node = self.create_node(address, None);
        self.nodes.insert(address, node);

        Ok(())
    }

    /// Realizes the four children of a tile.
    ///
    /// Children that already exist are kept. Those that were promoted to roots are linked back
    /// to the tile.
    pub fn subdivide(&mut self, address: TileAddress) -> Result<[TileAddress; 4], SurfaceError> {
        if !self.nodes.contains_key(&address) {
            return Err(SurfaceError::UnknownTile(address));
        }

        if address.level >= self.max_level {
            return Err(SurfaceError::MaxLevel(address, self.max_level));
        }

        let children = address.children();

        for child in children {
            if let Some(node) = self.nodes.get_mut(&child) {
                if node.parent.is_none() {
                    debug!("Linking root tile {child} to its parent {address}.");
                    node.parent = Some(address);
                }
                continue;
            }

            let node = self.create_node(child, Some(address));
            self.nodes.insert(child, node);
        }

        if let Some(node) = self.nodes.get_mut(&address) {
            for child in children {
                if !node.children.contains(&child) {
                    node.children.push(child);
                }
            }
        }

        Ok(children)
    }

    /// Removes every descendant of a tile, aborting their loads and releasing their textures.
    pub fn merge(
        &mut self,
        address: TileAddress,
        images: &mut Assets<Image>,
        loader: &mut dyn LayerLoader,
    ) -> Result<(), SurfaceError> {
        let node = self.nodes.get(&address).ok_or(SurfaceError::UnknownTile(address))?;
        let mut stack = node.children.clone();
        let mut descendants = Vec::new();

        while let Some(descendant) = stack.pop() {
            if let Some(node) = self.nodes.get(&descendant) {
                stack.extend_from_slice(&node.children);
                descendants.push(descendant);
            }
        }

        // deepest tiles first, so that no tile is promoted on the way
        descendants.sort_by_key(|descendant| std::cmp::Reverse(descendant.level));

        for descendant in descendants {
            self.evict(descendant, images, loader)?;
        }

        Ok(())
    }

    /// Removes a tile from the tree.
    ///
    /// All of its materials are aborted and cleared. Its children survive as roots. Textures
    /// borrowed below them from the evicted tile or from any tile above it are dropped, since
    /// those tiles are no longer their ancestors.
    pub fn evict(
        &mut self,
        address: TileAddress,
        images: &mut Assets<Image>,
        loader: &mut dyn LayerLoader,
    ) -> Result<(), SurfaceError> {
        let mut node = self.nodes.remove(&address).ok_or(SurfaceError::UnknownTile(address))?;

        for material in node.materials.values_mut() {
            material.abort_loading(loader);
            material.clear(images);
        }

        if let Some(parent) = node.parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.retain(|&child| child != address);
        }

        for child in &node.children {
            if let Some(child) = self.nodes.get_mut(child) {
                debug!("Promoting tile {} to a root.", child.address);
                child.parent = None;
            }
        }

        self.revalidate_borrowers(node.children);
        self.released_tiles.push(address);

        Ok(())
    }

    /// Applies all queued [`LodChange`]s.
    pub fn apply_lod_changes(&mut self, images: &mut Assets<Image>, loader: &mut dyn LayerLoader) {
        self.released_tiles.clear();

        for change in mem::take(&mut self.lod_changes) {
            let result = match change {
                LodChange::Subdivide(address) => self.subdivide(address).map(|_| ()),
                LodChange::Merge(address) => self.merge(address, images, loader),
                LodChange::Evict(address) => self.evict(address, images, loader),
            };

            if let Err(error) = result {
                warn!("Failed to apply {change:?}: {error}");
            }
        }
    }

    /// The texture to draw a tile with for one layer.
    ///
    /// Walks from the tile towards the root and returns the first texture found, together with
    /// the address of the tile it belongs to.
    pub fn display_texture(&self, address: TileAddress, layer: LayerId) -> Option<DisplayTexture> {
        let mut current = Some(address);

        while let Some(address) = current {
            let node = self.nodes.get(&address)?;

            if let Some(texture) = node.material(layer).and_then(Material::display) {
                return Some(texture);
            }

            current = node.parent;
        }

        None
    }

    /// Requests the imagery of one tile for one layer.
    ///
    /// Returns whether a request was issued. Tiles outside the layer's level range have no
    /// material and are never requested.
    pub fn request_load(
        &mut self,
        address: TileAddress,
        layer: LayerId,
        loader: &mut dyn LayerLoader,
    ) -> Result<bool, SurfaceError> {
        let source = self
            .layer(layer)
            .ok_or(SurfaceError::UnknownLayer(layer))?
            .source(address);
        let token = self.next_token();
        let completions = self.completions.clone();

        let node = self
            .nodes
            .get_mut(&address)
            .ok_or(SurfaceError::UnknownTile(address))?;

        let Some(material) = node.materials.get_mut(&layer) else {
            return Ok(false);
        };

        let request = LoadRequest::new(token, address, layer, source, completions);
        Ok(material.request_load(request, loader))
    }

    /// Requests the imagery of every material that has neither a texture of its own nor a load
    /// in flight. A fallback texture is never a reason to skip a tile.
    pub fn request_missing(&mut self, loader: &mut dyn LayerLoader) -> usize {
        let Self {
            nodes,
            layers,
            next_token,
            completions,
            ..
        } = self;

        let mut requested = 0;

        for node in nodes.values_mut() {
            for material in node.materials.values_mut() {
                if !material.needs_load() {
                    continue;
                }

                let Some(layer) = layers.iter().find(|layer| layer.id == material.layer()) else {
                    continue;
                };

                *next_token += 1;
                let request = LoadRequest::new(
                    RequestToken(*next_token),
                    node.address,
                    layer.id,
                    layer.source(node.address),
                    completions.clone(),
                );

                if material.request_load(request, loader) {
                    requested += 1;
                }
            }
        }

        requested
    }

    /// Applies every completion handed back by the loader since the last call.
    pub fn finish_loading(&mut self, images: &mut Assets<Image>) -> usize {
        let mut applied = 0;

        while let Ok(completion) = self.receiver.try_recv() {
            if self.complete(completion, images) == ApplyOutcome::Applied {
                applied += 1;
            }
        }

        applied
    }

    /// Applies a single completion. Completions for tiles that left the tree are discarded.
    pub fn complete(&mut self, completion: LoadCompletion, images: &mut Assets<Image>) -> ApplyOutcome {
        let address = completion.address;
        let layer = completion.layer;

        let Some(material) = self
            .nodes
            .get_mut(&address)
            .and_then(|node| node.materials.get_mut(&layer))
        else {
            debug!("Tile {address} is no longer part of the tile tree.");
            self.stale_completions += 1;
            return ApplyOutcome::Stale;
        };

        let had_texture = material.texture().is_some_and(|texture| texture.is_owned());
        let outcome = material.complete(completion, images);

        match outcome {
            ApplyOutcome::Stale => self.stale_completions += 1,
            // the previous texture was released, tiles borrowing it have to let go
            ApplyOutcome::Applied if had_texture => {
                let children = self.nodes.get(&address).map(|node| node.children.clone()).unwrap_or_default();
                self.drop_borrowers(children, address, layer);
            }
            _ => {}
        }

        outcome
    }

    /// Shares the closest ancestor texture with a tile, without uploading anything.
    ///
    /// The tile keeps loading its own imagery. Returns the address of the donor, if one was
    /// found.
    pub fn inherit_texture(
        &mut self,
        address: TileAddress,
        layer: LayerId,
        images: &mut Assets<Image>,
        loader: &mut dyn LayerLoader,
    ) -> Result<Option<TileAddress>, SurfaceError> {
        let node = self.nodes.get(&address).ok_or(SurfaceError::UnknownTile(address))?;

        let Some(fallback) = node.parent.and_then(|parent| self.display_texture(parent, layer)) else {
            return Ok(None);
        };

        let Some(material) = self
            .nodes
            .get_mut(&address)
            .and_then(|node| node.materials.get_mut(&layer))
        else {
            return Ok(None);
        };

        let had_texture = material.texture().is_some_and(TileTexture::is_owned);
        material.apply_texture(
            fallback.texture,
            fallback.picking_mask,
            Some(fallback.resolved),
            images,
            loader,
        );

        // the tile's own texture was released, tiles borrowing it have to let go
        if had_texture {
            let children = self.nodes.get(&address).map(|node| node.children.clone()).unwrap_or_default();
            self.drop_borrowers(children, address, layer);
        }

        Ok(Some(fallback.resolved))
    }

    /// Invalidates the imagery of a layer, for example after its style changed.
    ///
    /// Every material of the layer requests its imagery again. Loads of the previous style still
    /// in flight are aborted. Returns the number of issued requests.
    pub fn restyle_layer(&mut self, layer: LayerId, loader: &mut dyn LayerLoader) -> Result<usize, SurfaceError> {
        let entry = self
            .layers
            .iter_mut()
            .find(|entry| entry.id == layer)
            .ok_or(SurfaceError::UnknownLayer(layer))?;
        entry.revision += 1;

        let addresses = self
            .nodes
            .values()
            .filter(|node| node.materials.contains_key(&layer))
            .map(|node| node.address)
            .collect::<Vec<_>>();

        let mut requested = 0;

        for address in addresses {
            if self.request_load(address, layer, loader)? {
                requested += 1;
            }
        }

        Ok(requested)
    }

    pub fn add_layer(&mut self, config: &LayerConfig) -> Result<(), SurfaceError> {
        if self.layer(config.id).is_some() {
            return Err(SurfaceError::LayerExists(config.id));
        }

        let layer = Layer::new(config, &self.root);

        for node in self.nodes.values_mut() {
            if layer.covers(node.address) {
                node.materials
                    .insert(layer.id, Material::new(node.address, layer.id));
            }
        }

        self.layers.push(layer);

        Ok(())
    }

    pub fn remove_layer(
        &mut self,
        layer: LayerId,
        images: &mut Assets<Image>,
        loader: &mut dyn LayerLoader,
    ) -> Result<(), SurfaceError> {
        let index = self
            .layers
            .iter()
            .position(|entry| entry.id == layer)
            .ok_or(SurfaceError::UnknownLayer(layer))?;
        self.layers.remove(index);

        // borrowed textures are dropped, owned ones are released here
        for node in self.nodes.values_mut() {
            if let Some(mut material) = node.materials.remove(&layer) {
                material.abort_loading(loader);
                material.clear(images);
            }
        }

        Ok(())
    }

    fn next_token(&mut self) -> RequestToken {
        self.next_token += 1;
        RequestToken(self.next_token)
    }

    fn create_node(&self, address: TileAddress, parent: Option<TileAddress>) -> TileNode {
        TileNode {
            address,
            parent,
            children: Vec::new(),
            materials: self
                .layers
                .iter()
                .filter(|layer| layer.covers(address))
                .map(|layer| (layer.id, Material::new(address, layer.id)))
                .collect(),
        }
    }

    /// Drops borrowed textures in the subtrees below `roots` whose donor can no longer be reached
    /// through parent links.
    fn revalidate_borrowers(&mut self, roots: Vec<TileAddress>) {
        let mut stack = roots;
        let mut orphaned = Vec::new();

        while let Some(address) = stack.pop() {
            let Some(node) = self.nodes.get(&address) else {
                continue;
            };

            for material in node.materials.values() {
                let donors = [material.texture(), material.picking_mask()]
                    .into_iter()
                    .flatten()
                    .filter_map(TileTexture::donor);

                for donor in donors {
                    if !self.is_linked_ancestor(donor, address) {
                        orphaned.push((address, material.layer(), donor));
                    }
                }
            }

            stack.extend_from_slice(&node.children);
        }

        for (address, layer, donor) in orphaned {
            if let Some(material) = self
                .nodes
                .get_mut(&address)
                .and_then(|node| node.materials.get_mut(&layer))
                && material.drop_borrowed(donor)
            {
                debug!("Tile {address} lost its fallback texture from {donor}.");
            }
        }
    }

    /// Whether `ancestor` is reached by following the parent links of `address`.
    fn is_linked_ancestor(&self, ancestor: TileAddress, address: TileAddress) -> bool {
        let mut current = self.nodes.get(&address).and_then(|node| node.parent);

        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }

            current = self.nodes.get(&parent).and_then(|node| node.parent);
        }

        false
    }

    /// Drops textures borrowed from `donor` in the subtrees below `roots`.
    fn drop_borrowers(&mut self, roots: Vec<TileAddress>, donor: TileAddress, layer: LayerId) {
        let mut stack = roots;

        while let Some(address) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&address) else {
                continue;
            };

            for material in node.materials.values_mut() {
                if material.layer() == layer && material.drop_borrowed(donor) {
                    debug!("Tile {address} lost its fallback texture from {donor}.");
                }
            }

            stack.extend_from_slice(&node.children);
        }
    }

    /// Applies the changes queued by the LOD selector.
    pub fn update(
        mut tile_trees: Query<(&mut TileTree, &mut DefaultLoader)>,
        mut images: ResMut<Assets<Image>>,
    ) {
        for (mut tile_tree, mut loader) in &mut tile_trees {
            tile_tree.apply_lod_changes(&mut images, &mut *loader);
        }
    }

    /// Applies the images loaded since the last frame.
    pub fn apply_completions(
        mut tile_trees: Query<&mut TileTree>,
        mut images: ResMut<Assets<Image>>,
    ) {
        for mut tile_tree in &mut tile_trees {
            tile_tree.finish_loading(&mut images);
        }
    }

    /// Requests the imagery of all tiles without a texture of their own.
    pub fn request_tiles(mut tile_trees: Query<(&mut TileTree, &mut DefaultLoader)>) {
        for (mut tile_tree, mut loader) in &mut tile_trees {
            tile_tree.request_missing(&mut *loader);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{LayerKind, LoadResult, MaterialState};

    #[derive(Default)]
    struct RecordingLoader {
        requests: Vec<LoadRequest>,
        cancelled: Vec<RequestToken>,
    }

    impl LayerLoader for RecordingLoader {
        fn fetch_image(&mut self, request: LoadRequest) {
            self.requests.push(request);
        }

        fn cancel(&mut self, token: RequestToken) {
            self.cancelled.push(token);
        }
    }

    impl RecordingLoader {
        fn respond(&mut self, address: TileAddress, result: LoadResult) {
            let index = self
                .requests
                .iter()
                .rposition(|request| request.address == address)
                .unwrap();
            self.requests.remove(index).respond(result);
        }
    }

    const IMAGERY: LayerId = LayerId(0);

    fn config() -> SurfaceConfig {
        SurfaceConfig {
            path: "surface".to_string(),
            max_level: 8,
            roots: vec![TileAddress::new(0, 0, 0)],
            layers: vec![LayerConfig {
                id: IMAGERY,
                ..Default::default()
            }],
        }
    }

    fn root() -> TileAddress {
        TileAddress::new(0, 0, 0)
    }

    #[test]
    fn new_tree_contains_roots() {
        let tile_tree = TileTree::new(&config());

        assert_eq!(tile_tree.len(), 1);
        assert!(tile_tree.material(root(), IMAGERY).is_some());
        assert_eq!(tile_tree.display_texture(root(), IMAGERY), None);
    }

    #[test]
    fn subdivide_links_children() {
        let mut tile_tree = TileTree::new(&config());
        let children = tile_tree.subdivide(root()).unwrap();

        assert_eq!(tile_tree.node(root()).unwrap().children(), &children);
        for child in children {
            assert_eq!(tile_tree.node(child).unwrap().parent(), Some(root()));
            assert!(tile_tree.material(child, IMAGERY).is_some());
        }

        // subdividing again keeps the existing children
        tile_tree.subdivide(root()).unwrap();
        assert_eq!(tile_tree.len(), 5);
        assert_eq!(tile_tree.node(root()).unwrap().children().len(), 4);
    }

    #[test]
    fn subdivide_respects_max_level() {
        let mut tile_tree = TileTree::new(&SurfaceConfig {
            max_level: 0,
            ..config()
        });

        assert!(matches!(
            tile_tree.subdivide(root()),
            Err(SurfaceError::MaxLevel(_, 0))
        ));
        assert!(matches!(
            tile_tree.subdivide(TileAddress::new(3, 0, 0)),
            Err(SurfaceError::UnknownTile(_))
        ));
    }

    #[test]
    fn request_missing_skips_loading_materials() {
        let mut tile_tree = TileTree::new(&config());
        let mut loader = RecordingLoader::default();
        tile_tree.subdivide(root()).unwrap();

        assert_eq!(tile_tree.request_missing(&mut loader), 5);
        assert_eq!(tile_tree.request_missing(&mut loader), 0);

        let tokens = loader.requests.iter().map(|request| request.token).collect::<Vec<_>>();
        let mut unique = tokens.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), tokens.len());
    }

    #[test]
    fn layer_range_limits_materials() {
        let mut tile_tree = TileTree::new(&config());
        tile_tree
            .add_layer(&LayerConfig {
                id: LayerId(1),
                kind: LayerKind::Vector,
                min_level: 1,
                max_level: 1,
                ..Default::default()
            })
            .unwrap();

        let children = tile_tree.subdivide(root()).unwrap();
        let grandchildren = tile_tree.subdivide(children[0]).unwrap();

        assert!(tile_tree.material(root(), LayerId(1)).is_none());
        assert!(tile_tree.material(children[0], LayerId(1)).is_some());
        assert!(tile_tree.material(grandchildren[0], LayerId(1)).is_none());
        assert!(matches!(
            tile_tree.add_layer(&LayerConfig {
                id: LayerId(1),
                ..Default::default()
            }),
            Err(SurfaceError::LayerExists(_))
        ));
    }

    #[test]
    fn overzoomed_tiles_fall_back() {
        let mut tile_tree = TileTree::new(&config());
        let mut loader = RecordingLoader::default();
        let mut images = Assets::<Image>::default();
        tile_tree
            .add_layer(&LayerConfig {
                id: LayerId(1),
                max_level: 0,
                ..Default::default()
            })
            .unwrap();

        let child = tile_tree.subdivide(root()).unwrap()[3];
        tile_tree.request_missing(&mut loader);
        loader.respond(root(), Ok(Image::default()));
        loader.respond(root(), Ok(Image::default()));
        tile_tree.finish_loading(&mut images);

        let texture = tile_tree.display_texture(child, LayerId(1)).unwrap();
        assert_eq!(texture.resolved, root());
    }

    #[test]
    fn failed_tile_keeps_ancestor_fallback() {
        let mut tile_tree = TileTree::new(&config());
        let mut loader = RecordingLoader::default();
        let mut images = Assets::<Image>::default();

        let child = tile_tree.subdivide(root()).unwrap()[0];
        tile_tree.request_missing(&mut loader);
        loader.respond(root(), Ok(Image::default()));
        loader.respond(
            child,
            Err(crate::error::LoadFailure::Decode {
                path: "surface/imagery/1/0/0.png".to_string(),
                reason: "truncated".to_string(),
            }),
        );
        tile_tree.finish_loading(&mut images);

        let material = tile_tree.material(child, IMAGERY).unwrap();
        assert_eq!(material.state(), MaterialState::Failed);
        assert_eq!(tile_tree.display_texture(child, IMAGERY).unwrap().resolved, root());

        // failed tiles are not requested again until restyled
        assert_eq!(tile_tree.request_missing(&mut loader), 0);
        assert_eq!(tile_tree.restyle_layer(IMAGERY, &mut loader).unwrap(), 5);
    }

    #[test]
    fn merge_removes_descendants() {
        let mut tile_tree = TileTree::new(&config());
        let mut loader = RecordingLoader::default();
        let mut images = Assets::<Image>::default();

        let children = tile_tree.subdivide(root()).unwrap();
        tile_tree.subdivide(children[1]).unwrap();
        tile_tree.request_missing(&mut loader);

        tile_tree.queue(LodChange::Merge(root()));
        tile_tree.apply_lod_changes(&mut images, &mut loader);

        assert_eq!(tile_tree.len(), 1);
        assert!(tile_tree.node(root()).unwrap().children().is_empty());
        assert_eq!(tile_tree.released_tiles().len(), 8);
        assert_eq!(loader.cancelled.len(), 8);
        assert!(tile_tree.material(root(), IMAGERY).unwrap().is_loading());
    }

    #[test]
    fn evict_promotes_children_and_drops_borrowed_textures() {
        let mut tile_tree = TileTree::new(&config());
        let mut loader = RecordingLoader::default();
        let mut images = Assets::<Image>::default();

        let child = tile_tree.subdivide(root()).unwrap()[2];
        tile_tree.request_missing(&mut loader);
        loader.respond(root(), Ok(Image::default()));
        tile_tree.finish_loading(&mut images);

        assert_eq!(
            tile_tree
                .inherit_texture(child, IMAGERY, &mut images, &mut loader)
                .unwrap(),
            Some(root())
        );
        let material = tile_tree.material(child, IMAGERY).unwrap();
        assert!(material.is_ready() && material.is_loading());

        tile_tree.evict(root(), &mut images, &mut loader).unwrap();

        let node = tile_tree.node(child).unwrap();
        assert_eq!(node.parent(), None);
        let material = node.material(IMAGERY).unwrap();
        assert!(!material.is_ready());
        assert!(material.is_loading());
        assert_eq!(tile_tree.display_texture(child, IMAGERY), None);
        assert_eq!(images.len(), 0);
    }

    #[test]
    fn promoted_tiles_drop_textures_of_former_ancestors() {
        let mut tile_tree = TileTree::new(&config());
        let mut loader = RecordingLoader::default();
        let mut images = Assets::<Image>::default();

        tile_tree.request_load(root(), IMAGERY, &mut loader).unwrap();
        loader.respond(root(), Ok(Image::default()));
        tile_tree.finish_loading(&mut images);

        let child = tile_tree.subdivide(root()).unwrap()[0];
        let grandchild = tile_tree.subdivide(child).unwrap()[3];
        assert_eq!(
            tile_tree
                .inherit_texture(grandchild, IMAGERY, &mut images, &mut loader)
                .unwrap(),
            Some(root())
        );

        tile_tree.evict(child, &mut images, &mut loader).unwrap();

        let material = tile_tree.material(grandchild, IMAGERY).unwrap();
        assert!(material.texture().is_none());
        assert!(!material.is_ready());
        assert_eq!(tile_tree.display_texture(grandchild, IMAGERY), None);

        tile_tree.evict(root(), &mut images, &mut loader).unwrap();
        assert_eq!(tile_tree.display_texture(grandchild, IMAGERY), None);
        assert_eq!(images.len(), 0);
    }

    #[test]
    fn subdivide_relinks_promoted_children() {
        let mut tile_tree = TileTree::new(&config());
        let mut loader = RecordingLoader::default();
        let mut images = Assets::<Image>::default();

        let child = tile_tree.subdivide(root()).unwrap()[1];
        let grandchild = tile_tree.subdivide(child).unwrap()[2];
        tile_tree.evict(child, &mut images, &mut loader).unwrap();
        assert_eq!(tile_tree.node(grandchild).unwrap().parent(), None);

        tile_tree.subdivide(root()).unwrap();
        tile_tree.subdivide(child).unwrap();

        assert_eq!(tile_tree.node(grandchild).unwrap().parent(), Some(child));
        assert_eq!(tile_tree.node(child).unwrap().children().len(), 4);

        tile_tree.request_load(root(), IMAGERY, &mut loader).unwrap();
        loader.respond(root(), Ok(Image::default()));
        tile_tree.finish_loading(&mut images);

        assert_eq!(tile_tree.display_texture(grandchild, IMAGERY).unwrap().resolved, root());
    }

    #[test]
    fn inheriting_over_own_texture_releases_borrowers() {
        let mut tile_tree = TileTree::new(&config());
        let mut loader = RecordingLoader::default();
        let mut images = Assets::<Image>::default();

        let child = tile_tree.subdivide(root()).unwrap()[0];
        let grandchild = tile_tree.subdivide(child).unwrap()[0];
        for address in [root(), child] {
            tile_tree.request_load(address, IMAGERY, &mut loader).unwrap();
            loader.respond(address, Ok(Image::default()));
        }
        tile_tree.finish_loading(&mut images);
        assert_eq!(
            tile_tree
                .inherit_texture(grandchild, IMAGERY, &mut images, &mut loader)
                .unwrap(),
            Some(child)
        );

        tile_tree
            .inherit_texture(child, IMAGERY, &mut images, &mut loader)
            .unwrap();

        assert!(tile_tree.material(grandchild, IMAGERY).unwrap().texture().is_none());
        let fallback = tile_tree.display_texture(grandchild, IMAGERY).unwrap();
        assert_eq!(fallback.resolved, root());
        assert!(images.contains(fallback.texture.id()));
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn replaced_texture_releases_borrowers() {
        let mut tile_tree = TileTree::new(&config());
        let mut loader = RecordingLoader::default();
        let mut images = Assets::<Image>::default();

        let child = tile_tree.subdivide(root()).unwrap()[0];
        tile_tree.request_missing(&mut loader);
        loader.respond(root(), Ok(Image::default()));
        tile_tree.finish_loading(&mut images);
        tile_tree
            .inherit_texture(child, IMAGERY, &mut images, &mut loader)
            .unwrap();

        tile_tree.restyle_layer(IMAGERY, &mut loader).unwrap();
        loader.respond(root(), Ok(Image::default()));
        tile_tree.finish_loading(&mut images);

        assert!(!tile_tree.material(child, IMAGERY).unwrap().is_ready());
        let fallback = tile_tree.display_texture(child, IMAGERY).unwrap();
        assert_eq!(fallback.resolved, root());
        assert!(images.contains(fallback.texture.id()));
    }

    #[test]
    fn completion_for_removed_tile_is_stale() {
        let mut tile_tree = TileTree::new(&config());
        let mut loader = RecordingLoader::default();
        let mut images = Assets::<Image>::default();

        let child = tile_tree.subdivide(root()).unwrap()[0];
        tile_tree.request_missing(&mut loader);
        tile_tree.merge(root(), &mut images, &mut loader).unwrap();

        loader.respond(child, Ok(Image::default()));
        assert_eq!(tile_tree.finish_loading(&mut images), 0);
        assert_eq!(tile_tree.stale_completions(), 1);
        assert_eq!(images.len(), 0);
    }

    #[test]
    fn remove_layer_clears_materials() {
        let mut tile_tree = TileTree::new(&config());
        let mut loader = RecordingLoader::default();
        let mut images = Assets::<Image>::default();

        tile_tree.request_missing(&mut loader);
        loader.respond(root(), Ok(Image::default()));
        tile_tree.finish_loading(&mut images);
        assert_eq!(images.len(), 1);

        tile_tree.remove_layer(IMAGERY, &mut images, &mut loader).unwrap();

        assert!(tile_tree.layer(IMAGERY).is_none());
        assert!(tile_tree.material(root(), IMAGERY).is_none());
        assert_eq!(images.len(), 0);
        assert!(matches!(
            tile_tree.request_load(root(), IMAGERY, &mut loader),
            Err(SurfaceError::UnknownLayer(_))
        ));
    }
}
