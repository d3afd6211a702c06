use crate::math::TileAddress;
use bevy_asset::{Assets, Handle};
use bevy_image::Image;

/// A texture applied to a material.
///
/// Owned textures were uploaded for the material and are released together with it.
/// Borrowed textures belong to the material of an ancestor tile and are only dropped.
#[derive(Clone, Debug, PartialEq)]
pub enum TileTexture {
    Owned(Handle<Image>),
    BorrowedFrom {
        handle: Handle<Image>,
        donor: TileAddress,
    },
}

impl TileTexture {
    pub fn handle(&self) -> &Handle<Image> {
        match self {
            Self::Owned(handle) => handle,
            Self::BorrowedFrom { handle, .. } => handle,
        }
    }

    pub fn donor(&self) -> Option<TileAddress> {
        match self {
            Self::Owned(_) => None,
            Self::BorrowedFrom { donor, .. } => Some(*donor),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Releases the GPU image if this texture owns it.
    pub(crate) fn release(self, images: &mut Assets<Image>) {
        if let Self::Owned(handle) = self {
            images.remove(handle.id());
        }
    }
}

/// The texture a tile should be drawn with for one layer.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayTexture {
    pub texture: Handle<Image>,
    pub picking_mask: Option<Handle<Image>>,
    /// The tile whose imagery the texture shows. This is an ancestor while the tile's own
    /// imagery is not available.
    pub resolved: TileAddress,
}
