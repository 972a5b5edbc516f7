use std::collections::BTreeMap;

/// Properties fingerprinted for every known feature type.
pub const GENERAL_PROPERTIES: &[&str] = &["Placement", "Shape"];

/// Built-in relevant-property sets, keyed by host type tag.
const BUILTIN_TYPES: &[(&str, &[&str])] = &[
    ("Part::Feature", &["Length", "Width", "Height"]),
    ("Part::Box", &["Length", "Width", "Height"]),
    ("Part::Cylinder", &["Radius", "Height", "Angle"]),
    ("Sketcher::SketchObject", &["Geometry", "Constraints", "ExternalGeometry"]),
    ("PartDesign::Pad", &["Length", "Direction", "Type", "Reversed", "Midplane", "Offset"]),
    ("PartDesign::Pocket", &["Length", "Direction", "Type", "Reversed", "Midplane", "Offset"]),
    ("PartDesign::Revolution", &["Angle", "Axis", "Base", "Midplane", "Reversed"]),
    ("PartDesign::Groove", &["Angle", "Axis", "Base", "Reversed", "Midplane"]),
    ("PartDesign::AdditiveLoft", &["Sections", "Ruled", "Closed"]),
    ("PartDesign::SubtractiveLoft", &["Sections", "Ruled", "Closed"]),
    ("PartDesign::Fillet", &["Radius", "Base", "FilletType"]),
    ("PartDesign::Chamfer", &["Size", "Angle", "Base"]),
    ("PartDesign::Mirrored", &["MirrorPlane", "Originals"]),
    ("PartDesign::LinearPattern", &["Direction", "Occurrences", "Length", "Reversed"]),
    ("PartDesign::PolarPattern", &["Axis", "Occurrences", "Angle", "Reversed"]),
    ("Part::Thickness", &["Value", "Mode", "Join"]),
    ("Part::Helix", &["Pitch", "Height", "Radius", "Angle", "Growth"]),
    ("Part::Cut", &["Base", "Tool"]),
    ("Part::Fuse", &["Base", "Tool"]),
    ("Part::Common", &["Base", "Tool"]),
    ("Part::MultiCut", &["Shapes"]),
    ("Part::Compound", &["Links"]),
    ("Part::Offset", &["Value", "Mode", "Join"]),
    ("Part::Offset2D", &["Value", "Join", "Fill"]),
    ("Part::Loft", &["Sections", "Solid", "Ruled", "Closed"]),
    ("Part::Sweep", &["Spine", "Profiles", "Solid", "Frenet"]),
];

/// Declares which properties define a feature's geometry, per feature type.
///
/// Cosmetic and view properties (label, visibility, colors) are never listed. A type the
/// catalog does not know has no relevant set at all; fingerprinting such a feature is an
/// error rather than a guess.
#[derive(Debug, Clone)]
pub struct FeatureCatalog {
    types: BTreeMap<String, Vec<String>>,
}

impl FeatureCatalog {
    /// A catalog with no types registered.
    pub fn empty() -> Self {
        Self {
            types: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) the type-specific relevant properties of `type_id`.
    /// [`GENERAL_PROPERTIES`] are added automatically.
    pub fn register<I, S>(&mut self, type_id: impl Into<String>, properties: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut props: Vec<String> = properties.into_iter().map(Into::into).collect();
        for general in GENERAL_PROPERTIES {
            if !props.iter().any(|p| p == general) {
                props.push((*general).to_string());
            }
        }
        props.sort();
        props.dedup();
        self.types.insert(type_id.into(), props);
    }

    /// Relevant property names for `type_id`, sorted, or `None` for an unknown type.
    pub fn relevant_properties(&self, type_id: &str) -> Option<&[String]> {
        self.types.get(type_id).map(Vec::as_slice)
    }

    pub fn knows(&self, type_id: &str) -> bool {
        self.types.contains_key(type_id)
    }

    pub fn type_ids(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        let mut catalog = Self::empty();
        for (type_id, props) in BUILTIN_TYPES {
            catalog.register(*type_id, props.iter().copied());
        }
        catalog
    }
}
