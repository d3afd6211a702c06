use crate::item::ItemId;
use thiserror::Error;
use waw_surface::math::TileAddress;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("payload of tile {payload} was ingested as tile {address}")]
    AddressMismatch { address: TileAddress, payload: TileAddress },
    #[error("tile item {index} of tile {address} references {id}, which is not registered")]
    RegistryMismatch {
        address: TileAddress,
        index: usize,
        id: ItemId,
    },
    #[error("{0} is not registered")]
    UnknownItem(ItemId),
    #[error("failed to parse vector tile payload")]
    Payload(#[from] ron::error::SpannedError),
}
