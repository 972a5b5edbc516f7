use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the property holding a feature's current fingerprint.
pub const FEATURE_HASH: &str = "FeatureHash";

/// Name of the property holding a feature's bounded fingerprint history.
pub const FEATURE_HISTORY: &str = "FeatureHistory";

/// Property group the tracker attaches its own properties to.
pub const META_GROUP: &str = "Meta";

/// Stable identifier of a document object (the host's internal name, e.g. `Sketch001`).
///
/// Ordering is lexicographic on the name, which makes it usable as the canonical sort key
/// for dependency lists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FeatureId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A parametric object in the host document.
///
/// The tracker never creates or deletes features. It only reads their relevant
/// properties and attaches [`FEATURE_HASH`] and [`FEATURE_HISTORY`] to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    /// Host type tag, e.g. `PartDesign::Pad`.
    pub type_id: String,
    /// User-visible name. Cosmetic, never fingerprinted.
    pub label: String,
}

/// Three-component vector as the host stores it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Position and orientation of a feature.
///
/// The rotation is kept as a quaternion `[x, y, z, w]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub base: Vector,
    pub rotation: [f64; 4],
}

/// Condensed description of a shape.
///
/// Full B-rep geometry is never hashed; mass properties and bounding box are enough to
/// tell one result shape from another for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeSummary {
    pub center_of_mass: Vector,
    /// Diagonal, X, Y and Z lengths of the bounding box.
    pub bound_box: [f64; 4],
    pub volume: f64,
}

/// Typed value of a host property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Vector(Vector),
    Placement(Placement),
    Link(FeatureId),
    LinkList(Vec<FeatureId>),
    StringList(Vec<String>),
    Shape(ShapeSummary),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::Bool(_) => PropertyKind::Bool,
            Self::Integer(_) => PropertyKind::Integer,
            Self::Float(_) => PropertyKind::Float,
            Self::Text(_) => PropertyKind::Text,
            Self::Vector(_) => PropertyKind::Vector,
            Self::Placement(_) => PropertyKind::Placement,
            Self::Link(_) => PropertyKind::Link,
            Self::LinkList(_) => PropertyKind::LinkList,
            Self::StringList(_) => PropertyKind::StringList,
            Self::Shape(_) => PropertyKind::Shape,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            Self::StringList(items) => Some(items),
            _ => None,
        }
    }
}

/// The declared type of a property slot, used when the tracker creates one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Bool,
    Integer,
    Float,
    Text,
    Vector,
    Placement,
    Link,
    LinkList,
    StringList,
    Shape,
}

impl PropertyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Vector => "vector",
            Self::Placement => "placement",
            Self::Link => "link",
            Self::LinkList => "link_list",
            Self::StringList => "string_list",
            Self::Shape => "shape",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bool" => Some(Self::Bool),
            "integer" => Some(Self::Integer),
            "float" => Some(Self::Float),
            "text" => Some(Self::Text),
            "vector" => Some(Self::Vector),
            "placement" => Some(Self::Placement),
            "link" => Some(Self::Link),
            "link_list" => Some(Self::LinkList),
            "string_list" => Some(Self::StringList),
            "shape" => Some(Self::Shape),
            _ => None,
        }
    }
}

/// Input for creating a feature in a [`crate::db::Database`] document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFeatureInput {
    pub id: FeatureId,
    pub type_id: String,
    /// Defaults to the id when not given.
    pub label: Option<String>,
    /// Upstream features this one reads from.
    #[serde(default)]
    pub depends_on: Vec<FeatureId>,
}
