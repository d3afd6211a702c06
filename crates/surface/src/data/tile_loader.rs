use crate::{
    data::{LayerId, LoadSource},
    error::LoadFailure,
    math::TileAddress,
    plugin::SurfaceSettings,
};
use async_channel::{Receiver, Sender};
use bevy_asset::{AssetServer, Assets, Handle};
use bevy_ecs::prelude::*;
use bevy_image::Image;
use bevy_log::{debug, warn};
use slab::Slab;

/// Tags a load request. Tokens are unique per [`TileTree`](super::TileTree) and increase
/// monotonically, so a completion can always be matched against the request that is currently
/// pending on its material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(pub(crate) u64);

pub type LoadResult = Result<Image, LoadFailure>;

/// The imagery handed back by a loader.
#[derive(Debug)]
pub enum TileImage {
    /// Decoded pixels, uploaded when the completion is applied.
    Decoded(Image),
    /// An image already resident in `Assets<Image>`. The material takes over the handle and
    /// releases the asset together with its texture.
    Resident(Handle<Image>),
}

/// The result of a load request, delivered back to the tile tree.
#[derive(Debug)]
pub struct LoadCompletion {
    pub token: RequestToken,
    pub address: TileAddress,
    pub layer: LayerId,
    pub result: Result<TileImage, LoadFailure>,
}

pub(crate) fn completion_channel() -> (Sender<LoadCompletion>, Receiver<LoadCompletion>) {
    async_channel::unbounded()
}

/// A request for the image of one tile of one layer.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub token: RequestToken,
    pub address: TileAddress,
    pub layer: LayerId,
    pub source: LoadSource,
    completions: Sender<LoadCompletion>,
}

impl LoadRequest {
    pub(crate) fn new(
        token: RequestToken,
        address: TileAddress,
        layer: LayerId,
        source: LoadSource,
        completions: Sender<LoadCompletion>,
    ) -> Self {
        Self {
            token,
            address,
            layer,
            source,
            completions,
        }
    }

    /// Hands the result back to the tile tree. It is applied the next time the tree finishes
    /// loading, unless the request has been cancelled or superseded by then.
    pub fn respond(self, result: LoadResult) {
        self.send(result.map(TileImage::Decoded));
    }

    /// Hands back an image that is already stored in `Assets<Image>`, so that it is not
    /// uploaded a second time.
    pub fn respond_resident(self, handle: Handle<Image>) {
        self.send(Ok(TileImage::Resident(handle)));
    }

    fn send(self, result: Result<TileImage, LoadFailure>) {
        let completion = LoadCompletion {
            token: self.token,
            address: self.address,
            layer: self.layer,
            result,
        };

        if self.completions.try_send(completion).is_err() {
            debug!("Tile tree dropped before tile {} finished loading.", self.address);
        }
    }
}

/// Fetches and decodes tile images.
///
/// Materials only orchestrate loading. A loader receives every request through `fetch_image`
/// and answers it at any later point with [`LoadRequest::respond`]. After `cancel` was called for
/// a token, any response to it is ignored by the tree.
pub trait LayerLoader {
    fn fetch_image(&mut self, request: LoadRequest);

    fn cancel(&mut self, token: RequestToken);
}

struct LoadingTile {
    handle: Handle<Image>,
    request: LoadRequest,
}

/// Loads tile images through the [`AssetServer`].
#[derive(Component)]
pub struct DefaultLoader {
    to_load: Vec<LoadRequest>,
    loading_tiles: Slab<LoadingTile>,
}

impl Default for DefaultLoader {
    fn default() -> Self {
        Self {
            to_load: Vec::new(),
            loading_tiles: Slab::with_capacity(32),
        }
    }
}

impl LayerLoader for DefaultLoader {
    fn fetch_image(&mut self, request: LoadRequest) {
        self.to_load.push(request);
    }

    fn cancel(&mut self, token: RequestToken) {
        self.to_load.retain(|request| request.token != token);
        // dropping the handle lets the asset server discard the asset once it is done
        self.loading_tiles
            .retain(|_, tile| tile.request.token != token);
    }
}

impl DefaultLoader {
    pub fn queued(&self) -> usize {
        self.to_load.len()
    }

    pub fn loading(&self) -> usize {
        self.loading_tiles.len()
    }

    fn to_load_next(&mut self) -> Option<LoadRequest> {
        // coarse tiles first, their imagery is the fallback for everything below them
        let (index, _) = self
            .to_load
            .iter()
            .enumerate()
            .min_by_key(|(_, request)| request.address.level)?;

        Some(self.to_load.swap_remove(index))
    }

    pub(crate) fn start_loading(&mut self, asset_server: &AssetServer, max_loading: usize) {
        while self.loading_tiles.len() < max_loading {
            let Some(request) = self.to_load_next() else {
                break;
            };

            self.loading_tiles.insert(LoadingTile {
                handle: asset_server.load(request.source.path.clone()),
                request,
            });
        }
    }

    pub(crate) fn finish_loading(&mut self, asset_server: &AssetServer, images: &Assets<Image>) {
        let finished = self
            .loading_tiles
            .iter()
            .filter(|(_, tile)| {
                asset_server.is_loaded(tile.handle.id())
                    || asset_server.load_state(tile.handle.id()).is_failed()
            })
            .map(|(key, _)| key)
            .collect::<Vec<_>>();

        for key in finished {
            let LoadingTile { handle, request } = self.loading_tiles.remove(key);

            if images.contains(handle.id()) {
                request.respond_resident(handle);
                continue;
            }

            let path = request.source.path.display().to_string();
            warn!("Failed to load tile image {path}.");
            request.respond(Err(LoadFailure::Unavailable { path }));
        }
    }
}

/// Starts queued asset loads of every [`DefaultLoader`].
pub fn start_loading(
    mut loaders: Query<&mut DefaultLoader>,
    asset_server: Res<AssetServer>,
    settings: Res<SurfaceSettings>,
) {
    for mut loader in &mut loaders {
        loader.start_loading(&asset_server, settings.max_loading);
    }
}

/// Responds to every request of a [`DefaultLoader`] whose asset finished loading.
pub fn finish_loading(
    mut loaders: Query<&mut DefaultLoader>,
    asset_server: Res<AssetServer>,
    images: Res<Assets<Image>>,
) {
    for mut loader in &mut loaders {
        loader.finish_loading(&asset_server, &images);
    }
}
