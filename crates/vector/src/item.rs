use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use waw_surface::data::LayerId;

/// The identity of a vector feature, shared by every tile the feature appears in.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// How a feature is drawn on one layer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ItemStyle {
    pub fill_color: [f32; 4],
    pub stroke_color: [f32; 4],
    pub line_width: f32,
    pub visible: bool,
}

impl Default for ItemStyle {
    fn default() -> Self {
        Self {
            fill_color: [1.0, 1.0, 1.0, 0.5],
            stroke_color: [1.0, 1.0, 1.0, 1.0],
            line_width: 1.0,
            visible: true,
        }
    }
}

/// The version of items whose payload does not carry one.
pub const UNVERSIONED: i64 = -1;

/// A canonical vector feature.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub(crate) id: ItemId,
    pub(crate) version: i64,
    pub attributes: Attributes,
    /// Style overrides per layer.
    pub style: BTreeMap<LayerId, ItemStyle>,
    /// The layer the item was first added through.
    pub(crate) layer: Option<LayerId>,
}

impl Item {
    pub fn new(id: ItemId) -> Self {
        Self {
            id,
            version: UNVERSIONED,
            attributes: Attributes::new(),
            style: BTreeMap::new(),
            layer: None,
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn layer(&self) -> Option<LayerId> {
        self.layer
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// The style override for a layer, if the item has one.
    pub fn style_for(&self, layer: LayerId) -> Option<&ItemStyle> {
        self.style.get(&layer)
    }
}
