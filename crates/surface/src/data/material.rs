use crate::{
    data::{
        DisplayTexture, LayerId, LayerLoader, LoadCompletion, LoadRequest, LoadSource, RequestToken, TileImage,
        TileTexture,
    },
    error::LoadFailure,
    math::TileAddress,
};
use bevy_asset::{Assets, Handle};
use bevy_image::Image;
use bevy_log::{debug, warn};
use bitflags::bitflags;

bitflags! {
    /// The status flags of a [`Material`], readable by the renderer and debug tooling.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MaterialFlags: u8 {
        /// A texture has been applied, either the tile's own or one borrowed from an ancestor.
        const READY = 1 << 0;
        /// Exactly one request is outstanding with the layer loader.
        const LOADING = 1 << 1;
        /// The applied texture may be drawn.
        const TEXTURE_EXISTS = 1 << 2;
        const PICKING_READY = 1 << 3;
    }
}

/// The loading state of a [`Material`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialState {
    Empty,
    Loading,
    Ready,
    Failed,
}

/// What happened to a load completion handed to a material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Failed,
    /// The completion belongs to a request that was aborted or superseded. It was discarded.
    Stale,
}

#[derive(Clone, Debug)]
struct PendingLoad {
    token: RequestToken,
    source: LoadSource,
}

/// The texture state of one tile for one layer.
///
/// A material owns at most one outstanding load. Issuing a load for a different source aborts
/// the previous one, and every completion is matched against the token of the pending load,
/// so late completions of aborted requests never touch the material.
#[derive(Debug)]
pub struct Material {
    address: TileAddress,
    layer: LayerId,
    flags: MaterialFlags,
    texture: Option<TileTexture>,
    picking_mask: Option<TileTexture>,
    /// The tile whose imagery is currently applied.
    applied_node: Option<TileAddress>,
    pending: Option<PendingLoad>,
    failure: Option<LoadFailure>,
}

impl Material {
    pub fn new(address: TileAddress, layer: LayerId) -> Self {
        Self {
            address,
            layer,
            flags: MaterialFlags::empty(),
            texture: None,
            picking_mask: None,
            applied_node: None,
            pending: None,
            failure: None,
        }
    }

    pub fn address(&self) -> TileAddress {
        self.address
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn flags(&self) -> MaterialFlags {
        self.flags
    }

    pub fn is_ready(&self) -> bool {
        self.flags.contains(MaterialFlags::READY)
    }

    pub fn is_loading(&self) -> bool {
        self.flags.contains(MaterialFlags::LOADING)
    }

    pub fn texture_exists(&self) -> bool {
        self.flags.contains(MaterialFlags::TEXTURE_EXISTS)
    }

    pub fn picking_ready(&self) -> bool {
        self.flags.contains(MaterialFlags::PICKING_READY)
    }

    pub fn state(&self) -> MaterialState {
        if self.is_loading() {
            MaterialState::Loading
        } else if self.failure.is_some() {
            MaterialState::Failed
        } else if self.is_ready() {
            MaterialState::Ready
        } else {
            MaterialState::Empty
        }
    }

    pub fn texture(&self) -> Option<&TileTexture> {
        self.texture.as_ref()
    }

    pub fn picking_mask(&self) -> Option<&TileTexture> {
        self.picking_mask.as_ref()
    }

    pub fn applied_node(&self) -> Option<TileAddress> {
        self.applied_node
    }

    pub fn failure(&self) -> Option<&LoadFailure> {
        self.failure.as_ref()
    }

    pub fn pending_token(&self) -> Option<RequestToken> {
        self.pending.as_ref().map(|pending| pending.token)
    }

    pub fn pending_source(&self) -> Option<&LoadSource> {
        self.pending.as_ref().map(|pending| &pending.source)
    }

    /// Whether the material has neither a texture nor a load in flight and should request one.
    pub fn needs_load(&self) -> bool {
        !self.is_loading() && self.failure.is_none() && !self.texture.as_ref().is_some_and(TileTexture::is_owned)
    }

    /// The texture to draw, if the material has one.
    pub fn display(&self) -> Option<DisplayTexture> {
        if !self.texture_exists() {
            return None;
        }

        let texture = self.texture.as_ref()?;

        Some(DisplayTexture {
            texture: texture.handle().clone(),
            picking_mask: self.picking_mask.as_ref().map(|mask| mask.handle().clone()),
            resolved: self.applied_node.unwrap_or(self.address),
        })
    }

    /// Hands the request to the loader, unless the same source is already loading.
    ///
    /// A load of a different source is aborted first. Returns whether the request was issued.
    pub fn request_load(&mut self, request: LoadRequest, loader: &mut dyn LayerLoader) -> bool {
        debug_assert_eq!(request.address, self.address);
        debug_assert_eq!(request.layer, self.layer);

        if self.pending_source() == Some(&request.source) {
            return false;
        }

        self.abort_loading(loader);

        self.flags.insert(MaterialFlags::LOADING);
        self.flags.remove(MaterialFlags::TEXTURE_EXISTS);
        self.failure = None;
        self.pending = Some(PendingLoad {
            token: request.token,
            source: request.source.clone(),
        });

        loader.fetch_image(request);
        true
    }

    /// Routes a load completion into the material, ignoring it if it does not belong to the
    /// pending request.
    pub fn complete(&mut self, completion: LoadCompletion, images: &mut Assets<Image>) -> ApplyOutcome {
        if self.pending_token() != Some(completion.token)
            || completion.address != self.address
            || completion.layer != self.layer
        {
            debug!(
                "Discarding stale completion {:?} for tile {}.",
                completion.token, completion.address
            );
            return ApplyOutcome::Stale;
        }

        match completion.result {
            Ok(TileImage::Decoded(image)) => {
                self.apply_image(image, images);
                ApplyOutcome::Applied
            }
            Ok(TileImage::Resident(handle)) => {
                self.apply_resident(handle, images);
                ApplyOutcome::Applied
            }
            Err(failure) => self.fail(completion.token, failure),
        }
    }

    /// Uploads a freshly decoded image and applies it as the material's own texture.
    ///
    /// A previously owned texture is released.
    pub fn apply_image(&mut self, image: Image, images: &mut Assets<Image>) -> Handle<Image> {
        let handle = images.add(image);
        self.apply_resident(handle.clone(), images);

        handle
    }

    /// Applies an image that is already stored in `images` as the material's own texture,
    /// taking ownership of it. A previously owned texture is released.
    pub fn apply_resident(&mut self, handle: Handle<Image>, images: &mut Assets<Image>) {
        self.pending = None;
        self.failure = None;
        self.replace_texture(Some(TileTexture::Owned(handle)), images);
        self.applied_node = Some(self.address);
        self.flags = MaterialFlags::READY | MaterialFlags::PICKING_READY | MaterialFlags::TEXTURE_EXISTS;
    }

    /// Applies a texture that is already resident.
    ///
    /// With a `donor` ancestor the texture stays owned by the donor and the material's own load
    /// keeps running, since the borrowed texture only stands in until it completes. Without a
    /// donor the material takes ownership and any load in flight is aborted.
    pub fn apply_texture(
        &mut self,
        texture: Handle<Image>,
        picking_mask: Option<Handle<Image>>,
        donor: Option<TileAddress>,
        images: &mut Assets<Image>,
        loader: &mut dyn LayerLoader,
    ) {
        let donor = donor.filter(|&donor| donor != self.address);
        let wrap = |handle| match donor {
            Some(donor) => TileTexture::BorrowedFrom { handle, donor },
            None => TileTexture::Owned(handle),
        };

        if donor.is_none() {
            self.abort_loading(loader);
            self.failure = None;
        }

        self.replace_texture(Some(wrap(texture)), images);
        self.replace_picking_mask(picking_mask.map(wrap), images);
        self.applied_node = Some(donor.unwrap_or(self.address));
        self.flags
            .insert(MaterialFlags::READY | MaterialFlags::PICKING_READY | MaterialFlags::TEXTURE_EXISTS);
    }

    /// Records a failed load. The material keeps any texture it already had.
    pub fn fail(&mut self, token: RequestToken, failure: LoadFailure) -> ApplyOutcome {
        if self.pending_token() != Some(token) {
            return ApplyOutcome::Stale;
        }

        warn!("Tile {} of layer {} failed to load: {failure}", self.address, self.layer);

        self.pending = None;
        self.failure = Some(failure);
        self.flags.remove(MaterialFlags::LOADING);
        self.flags.set(MaterialFlags::TEXTURE_EXISTS, self.texture.is_some());

        ApplyOutcome::Failed
    }

    /// Cancels the outstanding load, if any. Completions of the cancelled request are ignored.
    pub fn abort_loading(&mut self, loader: &mut dyn LayerLoader) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        loader.cancel(pending.token);

        self.flags.remove(MaterialFlags::LOADING);
        self.flags.set(MaterialFlags::TEXTURE_EXISTS, self.texture.is_some());
    }

    /// Releases the textures owned by the material and resets it to its initial state.
    ///
    /// Call [`abort_loading`](Self::abort_loading) first, a pending load is forgotten without
    /// being cancelled.
    pub fn clear(&mut self, images: &mut Assets<Image>) {
        self.replace_texture(None, images);
        self.replace_picking_mask(None, images);
        self.applied_node = None;
        self.pending = None;
        self.failure = None;
        self.flags = MaterialFlags::empty();
    }

    /// Drops textures borrowed from `donor`, which is about to disappear or change its imagery.
    ///
    /// Returns whether anything was dropped. A pending load is kept.
    pub fn drop_borrowed(&mut self, donor: TileAddress) -> bool {
        let borrowed_from = |texture: &Option<TileTexture>| {
            texture.as_ref().and_then(TileTexture::donor) == Some(donor)
        };

        if borrowed_from(&self.picking_mask) {
            self.picking_mask = None;
        }

        if !borrowed_from(&self.texture) {
            return false;
        }

        self.texture = None;
        self.applied_node = None;
        self.flags
            .remove(MaterialFlags::READY | MaterialFlags::PICKING_READY | MaterialFlags::TEXTURE_EXISTS);

        true
    }

    fn replace_texture(&mut self, texture: Option<TileTexture>, images: &mut Assets<Image>) {
        if let Some(previous) = self.texture.take()
            && Some(previous.handle()) != texture.as_ref().map(TileTexture::handle)
        {
            previous.release(images);
        }

        self.texture = texture;
    }

    fn replace_picking_mask(&mut self, mask: Option<TileTexture>, images: &mut Assets<Image>) {
        if let Some(previous) = self.picking_mask.take()
            && Some(previous.handle()) != mask.as_ref().map(TileTexture::handle)
        {
            previous.release(images);
        }

        self.picking_mask = mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tile_loader::completion_channel;
    use async_channel::Receiver;
    use std::path::PathBuf;

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

    struct Fixture {
        material: Material,
        loader: RecordingLoader,
        images: Assets<Image>,
        receiver: Receiver<LoadCompletion>,
        sender: async_channel::Sender<LoadCompletion>,
    }

    impl Fixture {
        fn new() -> Self {
            let (sender, receiver) = completion_channel();

            Self {
                material: Material::new(TileAddress::new(5, 3, 2), LayerId(1)),
                loader: RecordingLoader::default(),
                images: Assets::default(),
                receiver,
                sender,
            }
        }

        fn request(&mut self, token: u64, revision: u32) -> bool {
            let request = LoadRequest::new(
                RequestToken(token),
                self.material.address(),
                self.material.layer(),
                LoadSource {
                    path: PathBuf::from("imagery/5/3/2.png"),
                    revision,
                },
                self.sender.clone(),
            );

            self.material.request_load(request, &mut self.loader)
        }

        fn respond(&mut self, index: usize, result: Result<Image, LoadFailure>) -> ApplyOutcome {
            self.loader.requests[index].clone().respond(result);
            let completion = self.receiver.try_recv().unwrap();
            self.material.complete(completion, &mut self.images)
        }
    }

    #[test]
    fn resident_image_is_not_uploaded_again() {
        let mut fixture = Fixture::new();
        fixture.request(1, 0);
        let handle = fixture.images.add(Image::default());

        fixture.loader.requests[0].clone().respond_resident(handle.clone());
        let completion = fixture.receiver.try_recv().unwrap();

        assert_eq!(fixture.material.complete(completion, &mut fixture.images), ApplyOutcome::Applied);
        assert_eq!(fixture.images.len(), 1);
        assert_eq!(fixture.material.texture(), Some(&TileTexture::Owned(handle.clone())));

        fixture.material.clear(&mut fixture.images);
        assert!(!fixture.images.contains(handle.id()));
    }

    fn failure() -> LoadFailure {
        LoadFailure::Fetch {
            path: "imagery/5/3/2.png".to_string(),
            reason: "timed out".to_string(),
        }
    }

    #[test]
    fn request_marks_loading() {
        let mut fixture = Fixture::new();

        assert_eq!(fixture.material.state(), MaterialState::Empty);
        assert!(fixture.request(1, 0));

        assert_eq!(fixture.material.state(), MaterialState::Loading);
        assert!(fixture.material.is_loading());
        assert!(!fixture.material.texture_exists());
        assert_eq!(fixture.loader.requests.len(), 1);
    }

    #[test]
    fn same_source_is_requested_once() {
        let mut fixture = Fixture::new();

        assert!(fixture.request(1, 0));
        assert!(!fixture.request(2, 0));

        assert_eq!(fixture.loader.requests.len(), 1);
        assert!(fixture.loader.cancelled.is_empty());
        assert_eq!(fixture.material.pending_token(), Some(RequestToken(1)));
    }

    #[test]
    fn different_source_aborts_previous_load() {
        let mut fixture = Fixture::new();

        fixture.request(1, 0);
        fixture.request(2, 1);

        assert_eq!(fixture.loader.cancelled, vec![RequestToken(1)]);
        assert_eq!(fixture.material.pending_token(), Some(RequestToken(2)));

        // the superseded request answers late
        assert_eq!(fixture.respond(0, Ok(Image::default())), ApplyOutcome::Stale);
        assert!(fixture.material.is_loading());
        assert!(!fixture.material.is_ready());

        assert_eq!(fixture.respond(1, Ok(Image::default())), ApplyOutcome::Applied);
        assert!(fixture.material.is_ready());
    }

    #[test]
    fn completion_applies_own_texture() {
        let mut fixture = Fixture::new();
        fixture.request(1, 0);

        assert_eq!(fixture.respond(0, Ok(Image::default())), ApplyOutcome::Applied);

        let material = &fixture.material;
        assert_eq!(material.state(), MaterialState::Ready);
        assert!(material.is_ready() && material.picking_ready() && material.texture_exists());
        assert!(!material.is_loading());
        assert_eq!(material.applied_node(), Some(TileAddress::new(5, 3, 2)));

        let texture = material.texture().unwrap();
        assert!(texture.is_owned());
        assert!(fixture.images.contains(texture.handle().id()));
    }

    #[test]
    fn abort_then_complete_is_ignored() {
        let mut fixture = Fixture::new();
        fixture.request(1, 0);

        fixture.material.abort_loading(&mut fixture.loader);
        assert_eq!(fixture.loader.cancelled, vec![RequestToken(1)]);
        assert_eq!(fixture.material.state(), MaterialState::Empty);

        assert_eq!(fixture.respond(0, Ok(Image::default())), ApplyOutcome::Stale);
        assert_eq!(fixture.material.state(), MaterialState::Empty);
        assert!(fixture.material.texture().is_none());
        assert_eq!(fixture.images.len(), 0);
    }

    #[test]
    fn abort_without_load_is_a_no_op() {
        let mut fixture = Fixture::new();

        fixture.material.abort_loading(&mut fixture.loader);
        fixture.material.abort_loading(&mut fixture.loader);

        assert!(fixture.loader.cancelled.is_empty());
        assert_eq!(fixture.material.state(), MaterialState::Empty);
    }

    #[test]
    fn failure_keeps_previous_texture() {
        let mut fixture = Fixture::new();
        fixture.request(1, 0);
        fixture.respond(0, Ok(Image::default()));
        let previous = fixture.material.texture().cloned();

        fixture.request(2, 1);
        assert_eq!(fixture.respond(1, Err(failure())), ApplyOutcome::Failed);

        assert_eq!(fixture.material.state(), MaterialState::Failed);
        assert_eq!(fixture.material.failure(), Some(&failure()));
        assert_eq!(fixture.material.texture().cloned(), previous);
        assert!(fixture.material.texture_exists());
        assert!(!fixture.material.needs_load());
    }

    #[test]
    fn failure_without_texture_shows_nothing() {
        let mut fixture = Fixture::new();
        fixture.request(1, 0);
        fixture.respond(0, Err(failure()));

        assert_eq!(fixture.material.state(), MaterialState::Failed);
        assert!(fixture.material.display().is_none());
    }

    #[test]
    fn apply_image_twice_releases_the_first() {
        let mut fixture = Fixture::new();

        let first = fixture.material.apply_image(Image::default(), &mut fixture.images);
        let second = fixture.material.apply_image(Image::default(), &mut fixture.images);

        assert_ne!(first, second);
        assert!(!fixture.images.contains(first.id()));
        assert!(fixture.images.contains(second.id()));
        assert_eq!(fixture.material.texture(), Some(&TileTexture::Owned(second)));
    }

    #[test]
    fn borrowed_texture_keeps_own_load_running() {
        let mut fixture = Fixture::new();
        let parent = TileAddress::new(4, 1, 1);
        let donor = fixture.images.add(Image::default());

        fixture.request(1, 0);
        fixture.material.apply_texture(
            donor.clone(),
            None,
            Some(parent),
            &mut fixture.images,
            &mut fixture.loader,
        );

        assert!(fixture.material.is_ready());
        assert!(fixture.material.is_loading());
        assert!(fixture.loader.cancelled.is_empty());
        assert_eq!(fixture.material.applied_node(), Some(parent));
        assert_eq!(fixture.material.display().unwrap().resolved, parent);

        // the borrowed texture is never released by the borrower
        fixture.material.clear(&mut fixture.images);
        assert!(fixture.images.contains(donor.id()));
    }

    #[test]
    fn owned_texture_supersedes_load() {
        let mut fixture = Fixture::new();
        let atlas = fixture.images.add(Image::default());
        let mask = fixture.images.add(Image::default());

        fixture.request(1, 0);
        fixture.material.apply_texture(
            atlas.clone(),
            Some(mask.clone()),
            None,
            &mut fixture.images,
            &mut fixture.loader,
        );

        assert_eq!(fixture.loader.cancelled, vec![RequestToken(1)]);
        assert!(!fixture.material.is_loading());
        assert_eq!(fixture.material.state(), MaterialState::Ready);
        assert_eq!(fixture.material.picking_mask(), Some(&TileTexture::Owned(mask.clone())));

        fixture.material.clear(&mut fixture.images);
        assert!(!fixture.images.contains(atlas.id()));
        assert!(!fixture.images.contains(mask.id()));
    }

    #[test]
    fn clear_is_idempotent() {
        let mut fixture = Fixture::new();
        fixture.request(1, 0);
        fixture.respond(0, Ok(Image::default()));

        fixture.material.clear(&mut fixture.images);
        let flags = fixture.material.flags();
        let state = fixture.material.state();

        fixture.material.clear(&mut fixture.images);

        assert_eq!(fixture.material.flags(), flags);
        assert_eq!(fixture.material.state(), state);
        assert_eq!(flags, MaterialFlags::empty());
        assert_eq!(state, MaterialState::Empty);
        assert!(fixture.material.texture().is_none());
        assert_eq!(fixture.material.applied_node(), None);
        assert_eq!(fixture.images.len(), 0);
    }

    #[test]
    fn drop_borrowed_only_touches_matching_donor() {
        let mut fixture = Fixture::new();
        let parent = TileAddress::new(4, 1, 1);
        let donor = fixture.images.add(Image::default());

        fixture.material.apply_texture(donor, None, Some(parent), &mut fixture.images, &mut fixture.loader);

        assert!(!fixture.material.drop_borrowed(TileAddress::new(3, 0, 0)));
        assert!(fixture.material.is_ready());

        assert!(fixture.material.drop_borrowed(parent));
        assert!(!fixture.material.is_ready());
        assert!(fixture.material.display().is_none());
        assert!(fixture.material.needs_load());
    }
}
