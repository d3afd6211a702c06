use crate::{
    error::VectorError,
    item::{Attributes, ItemId, ItemStyle, UNVERSIONED},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use waw_surface::{data::LayerId, math::TileAddress};

/// The bounding box of a vector tile, precomputed by the tile source.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Extent {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Extent {
    pub fn contains(&self, [x, y]: [f64; 2]) -> bool {
        (self.west..=self.east).contains(&x) && (self.south..=self.north).contains(&y)
    }
}

/// Tile-local geometry of a feature.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Geometry {
    Point([f64; 2]),
    LineString(Vec<[f64; 2]>),
    /// The first ring is the outer boundary, the others are holes.
    Polygon(Vec<Vec<[f64; 2]>>),
}

/// A feature as it arrives inside a vector tile.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RawFeature {
    pub id: ItemId,
    #[serde(default = "unversioned")]
    pub version: i64,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub style: BTreeMap<LayerId, ItemStyle>,
    pub geometry: Geometry,
}

fn unversioned() -> i64 {
    UNVERSIONED
}

/// A decoded vector tile, before its features are resolved against the registry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TilePayload {
    pub z: u32,
    pub x: u32,
    pub y: u32,
    /// The version of the tile.
    pub v: u32,
    pub bbox: Extent,
    /// Whether the geometries were simplified for low zoom levels.
    #[serde(default)]
    pub is_generalized: bool,
    /// Temporal level and span of the tile, zero for layers without a time dimension.
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub span: u32,
    #[serde(default)]
    pub values: Vec<RawFeature>,
}

impl TilePayload {
    pub fn from_ron(encoded: &str) -> Result<Self, VectorError> {
        Ok(ron::from_str(encoded)?)
    }

    pub fn address(&self) -> TileAddress {
        TileAddress::new(self.z, self.x, self.y)
    }

    pub fn version(&self) -> u32 {
        self.v
    }
}
