//! Analytical model entities
//!
//! Identifiers are the integer element ids assigned by the BIM tool. They are
//! wrapped in newtypes so a line id can never be passed where a node id is
//! expected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            #[inline]
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

entity_id!(
    /// Node identifier
    NodeId
);
entity_id!(
    /// Line identifier
    LineId
);
entity_id!(
    /// Cross-section identifier (the BIM family type id)
    SectionId
);
entity_id!(
    /// Member identifier (the BIM analytical element id)
    MemberId
);

/// A point in 3D space, in model units (meters)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node id
    pub id: NodeId,
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Node {
    /// Create node at the given coordinates
    #[inline]
    #[must_use]
    pub fn new(id: i64, x: f64, y: f64, z: f64) -> Self {
        Self {
            id: NodeId(id),
            x,
            y,
            z,
        }
    }
}

/// Segment between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    /// Line id
    pub id: LineId,
    /// Start node
    pub start_node_id: NodeId,
    /// End node
    pub end_node_id: NodeId,
}

impl Line {
    /// Create line between two nodes
    #[inline]
    #[must_use]
    pub fn new(id: i64, start: i64, end: i64) -> Self {
        Self {
            id: LineId(id),
            start_node_id: NodeId(start),
            end_node_id: NodeId(end),
        }
    }
}

/// Keys a [`CrossSection`] serializes itself, never allowed in its `extra`
pub const SECTION_FIELDS: [&str; 8] = ["id", "name", "h", "b", "A", "Iz", "Iy", "Jxx"];

/// Section profile and its section properties (SI units)
///
/// Property fields are optional because hand-authored models may omit them.
/// Unrecognised profile metadata is kept in `extra` and written back verbatim;
/// it must not use any of [`SECTION_FIELDS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSection {
    /// Section id
    pub id: SectionId,
    /// Profile name, e.g. `W310X39`
    pub name: String,
    /// Profile depth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
    /// Profile width
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<f64>,
    /// Area
    #[serde(rename = "A", default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    /// Strong-axis moment of inertia
    #[serde(rename = "Iz", default, skip_serializing_if = "Option::is_none")]
    pub iz: Option<f64>,
    /// Weak-axis moment of inertia
    #[serde(rename = "Iy", default, skip_serializing_if = "Option::is_none")]
    pub iy: Option<f64>,
    /// Torsional constant
    #[serde(rename = "Jxx", default, skip_serializing_if = "Option::is_none")]
    pub jxx: Option<f64>,
    /// Additional profile metadata
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CrossSection {
    /// Create a section with only a name
    #[must_use]
    pub fn named(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: SectionId(id),
            name: name.into(),
            h: None,
            b: None,
            area: None,
            iz: None,
            iy: None,
            jxx: None,
            extra: Map::new(),
        }
    }
}

/// Member material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Material {
    /// Structural steel
    #[default]
    Steel,
    /// Reinforced concrete
    Concrete,
}

/// Structural usage of a member as classified by the BIM tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StructuralRole {
    /// Beam
    Beam,
    /// Column
    Column,
    /// Joist
    Joist,
    /// Brace
    Brace,
    /// Truss chord
    #[serde(rename = "Truss Chord")]
    TrussChord,
    /// Truss diagonal
    #[serde(rename = "Truss Diagonal")]
    TrussDiagonal,
}

impl StructuralRole {
    /// Parse the BIM tool's role label, case-insensitively
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "beam" => Some(Self::Beam),
            "column" => Some(Self::Column),
            "joist" => Some(Self::Joist),
            "brace" => Some(Self::Brace),
            "truss chord" => Some(Self::TrussChord),
            "truss diagonal" => Some(Self::TrussDiagonal),
            _ => None,
        }
    }
}

/// Structural element binding a line to a cross section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Member id
    pub id: MemberId,
    /// Line the member lies on
    pub line_id: LineId,
    /// Assigned cross section
    pub cross_section_id: SectionId,
    /// Material
    #[serde(default)]
    pub material: Material,
    /// Structural role, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<StructuralRole>,
}

impl Member {
    /// Create a steel member with no role
    #[inline]
    #[must_use]
    pub fn new(id: i64, line: i64, section: i64) -> Self {
        Self {
            id: MemberId(id),
            line_id: LineId(line),
            cross_section_id: SectionId(section),
            material: Material::default(),
            role: None,
        }
    }
}

/// The normalized entity graph
///
/// All four collections are always present in the serialized form, even when
/// empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticalModel {
    /// Nodes
    pub nodes: Vec<Node>,
    /// Lines
    pub lines: Vec<Line>,
    /// Cross sections
    pub cross_sections: Vec<CrossSection>,
    /// Members
    pub members: Vec<Member>,
}

impl AnalyticalModel {
    /// Look up a member by id
    #[must_use]
    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Look up a cross section by id
    #[must_use]
    pub fn cross_section(&self, id: SectionId) -> Option<&CrossSection> {
        self.cross_sections.iter().find(|s| s.id == id)
    }

    /// Look up a line by id
    #[must_use]
    pub fn line(&self, id: LineId) -> Option<&Line> {
        self.lines.iter().find(|l| l.id == id)
    }

    /// Whether the model has no entities at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.lines.is_empty()
            && self.cross_sections.is_empty()
            && self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_uses_camel_case_keys() {
        let json = serde_json::to_value(Line::new(1, 2, 3)).unwrap();
        assert_eq!(json["startNodeId"], 2);
        assert_eq!(json["endNodeId"], 3);
    }

    #[test]
    fn cross_section_keeps_unknown_profile_fields() {
        let raw = r#"{"id":5,"name":"HEA200","A":0.0054,"familyName":"HEA"}"#;
        let section: CrossSection = serde_json::from_str(raw).unwrap();
        assert_eq!(section.area, Some(0.0054));
        assert_eq!(section.extra["familyName"], "HEA");

        let back = serde_json::to_value(&section).unwrap();
        assert_eq!(back["familyName"], "HEA");
        assert!(back.get("Iz").is_none());
    }

    #[test]
    fn role_labels_parse_case_insensitively() {
        assert_eq!(
            StructuralRole::from_label("truss Chord"),
            Some(StructuralRole::TrussChord)
        );
        assert_eq!(StructuralRole::from_label("Girt"), None);
    }
}
