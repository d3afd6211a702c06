mod tile_address;

pub use self::tile_address::TileAddress;
