//! Normalization of raw BIM exports
//!
//! The export worker emits one record per analytical member:
//!
//! ```json
//! {"id": 7, "nodeI": 1, "nodeJ": 2,
//!  "endpoints": {"i": [0, 0, 0], "j": [6, 0, 0]},
//!  "section": {"type_id": 3, "type_name": "W310X39"},
//!  "section_properties": {"STRUCTURAL_SECTION_AREA": 0.00494}}
//! ```
//!
//! Each record becomes a line (sharing the member id), two nodes and a cross
//! section keyed by the BIM type id. A document that already carries the four
//! model collections passes through unchanged.

use crate::codec::parse_value;
use crate::error::ModelError;
use crate::types::{
    AnalyticalModel, CrossSection, Line, LineId, Material, Member, MemberId, Node, NodeId,
    SectionId, StructuralRole,
};
use crate::validate::{validate, ValidationIssue};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Section properties assumed when the export omits them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionDefaults {
    /// Depth
    pub h: f64,
    /// Area
    pub area: f64,
    /// Strong-axis inertia
    pub iz: f64,
    /// Weak-axis inertia
    pub iy: f64,
    /// Torsional constant
    pub jxx: f64,
}

impl Default for SectionDefaults {
    fn default() -> Self {
        Self {
            h: 0.3,
            area: 0.01,
            iz: 1e-4,
            iy: 1e-5,
            jxx: 1e-6,
        }
    }
}

/// Convert a raw export into a validated [`AnalyticalModel`]
///
/// Members with missing or malformed node references are reported as
/// validation issues rather than dropped.
pub fn normalize_export(raw: &Value) -> Result<AnalyticalModel, ModelError> {
    if is_normalized(raw) {
        return parse_value(raw);
    }

    let (key, records) = match member_records(raw) {
        Some(found) => found,
        None => {
            return Err(ModelError::issue(ValidationIssue::MissingCollection {
                collection: "analytical_members".into(),
            }))
        }
    };
    if records.is_empty() {
        return Err(ModelError::EmptyExport);
    }

    let defaults = SectionDefaults::default();
    let mut nodes: BTreeMap<i64, Node> = BTreeMap::new();
    let mut sections: BTreeMap<i64, CrossSection> = BTreeMap::new();
    let mut lines = Vec::with_capacity(records.len());
    let mut members = Vec::with_capacity(records.len());
    let mut issues = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let path = format!("{key}[{index}]");
        let member_id = match record.get("id") {
            None => i64::try_from(index).unwrap_or(i64::MAX),
            Some(v) => match as_id(v) {
                Some(id) => id,
                None => {
                    issues.push(ValidationIssue::invalid(
                        format!("{path}.id"),
                        "expected an integer id",
                    ));
                    continue;
                }
            },
        };

        let endpoints = record.get("endpoints");
        let node_i = endpoint(record, endpoints, "nodeI", ["i", "I"], &path, &nodes);
        let node_j = endpoint(record, endpoints, "nodeJ", ["j", "J"], &path, &nodes);
        let (node_i, node_j) = match (node_i, node_j) {
            (Ok(i), Ok(j)) => (i, j),
            (i, j) => {
                issues.extend(i.err());
                issues.extend(j.err());
                continue;
            }
        };
        let (start, end) = (node_i.id, node_j.id);
        for node in [node_i, node_j] {
            nodes.entry(node.id.0).or_insert(node);
        }

        let empty = Value::Object(Map::new());
        let section = record.get("section").unwrap_or(&empty);
        let section_id = match section.get("type_id") {
            None => member_id,
            Some(v) => match as_id(v) {
                Some(id) => id,
                None => {
                    issues.push(ValidationIssue::invalid(
                        format!("{path}.section.type_id"),
                        "expected an integer id",
                    ));
                    continue;
                }
            },
        };
        sections.entry(section_id).or_insert_with(|| {
            let props = record.get("section_properties").unwrap_or(&empty);
            cross_section(section_id, section, props, &defaults)
        });

        lines.push(Line {
            id: LineId(member_id),
            start_node_id: start,
            end_node_id: end,
        });
        members.push(Member {
            id: MemberId(member_id),
            line_id: LineId(member_id),
            cross_section_id: SectionId(section_id),
            material: material(record),
            role: ["structural_role", "role"]
                .iter()
                .filter_map(|k| record.get(*k).and_then(Value::as_str))
                .find_map(StructuralRole::from_label),
        });
    }

    if !issues.is_empty() {
        return Err(ModelError::Validation(issues));
    }

    let model = AnalyticalModel {
        nodes: nodes.into_values().collect(),
        lines,
        cross_sections: sections.into_values().collect(),
        members,
    };
    validate(&model)?;
    Ok(model)
}

/// Build the error envelope persisted in place of a model when normalization
/// fails
#[must_use]
pub fn error_envelope(raw: Value, error: &ModelError) -> Value {
    json!({
        "error": {
            "kind": error.kind(),
            "message": error.to_string(),
            "issues": error.issues(),
        },
        "raw": raw,
    })
}

fn is_normalized(raw: &Value) -> bool {
    ["nodes", "lines", "crossSections"]
        .iter()
        .all(|k| raw.get(*k).is_some())
}

fn member_records(raw: &Value) -> Option<(&'static str, &Vec<Value>)> {
    ["analytical_members", "members"]
        .into_iter()
        .find_map(|key| raw.get(key).and_then(Value::as_array).map(|a| (key, a)))
}

fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn endpoint(
    record: &Value,
    endpoints: Option<&Value>,
    id_key: &str,
    coord_keys: [&str; 2],
    path: &str,
    known: &BTreeMap<i64, Node>,
) -> Result<Node, ValidationIssue> {
    let id = record
        .get(id_key)
        .and_then(as_id)
        .ok_or_else(|| ValidationIssue::invalid(format!("{path}.{id_key}"), "missing node id"))?;

    let coords = endpoints.and_then(|e| coord_keys.iter().find_map(|k| e.get(*k)));
    match coords.and_then(as_point) {
        Some([x, y, z]) => Ok(Node {
            id: NodeId(id),
            x,
            y,
            z,
        }),
        None => known.get(&id).cloned().ok_or_else(|| {
            ValidationIssue::invalid(
                format!("{path}.endpoints.{}", coord_keys[0]),
                format!("no coordinates for node {id}"),
            )
        }),
    }
}

fn as_point(value: &Value) -> Option<[f64; 3]> {
    let items = value.as_array()?;
    if items.len() < 3 {
        return None;
    }
    Some([items[0].as_f64()?, items[1].as_f64()?, items[2].as_f64()?])
}

fn cross_section(id: i64, section: &Value, props: &Value, defaults: &SectionDefaults) -> CrossSection {
    let prop = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| props.get(*k).and_then(Value::as_f64))
            .filter(|v| *v != 0.0)
    };
    let h = prop(&["STRUCTURAL_SECTION_COMMON_HEIGHT", "HEIGHT"]).unwrap_or(defaults.h);
    let name = ["type_name", "family_name"]
        .iter()
        .filter_map(|k| section.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or("Section");

    let mut extra = Map::new();
    if let Some(family) = section.get("family_name").and_then(Value::as_str) {
        extra.insert("familyName".into(), Value::String(family.to_string()));
    }

    CrossSection {
        id: SectionId(id),
        name: name.to_string(),
        h: Some(h),
        b: Some(prop(&["STRUCTURAL_SECTION_COMMON_WIDTH", "WIDTH"]).unwrap_or(h)),
        area: Some(prop(&["STRUCTURAL_SECTION_AREA"]).unwrap_or(defaults.area)),
        iz: Some(
            prop(&["STRUCTURAL_SECTION_COMMON_MOMENT_OF_INERTIA_STRONG_AXIS"])
                .unwrap_or(defaults.iz),
        ),
        iy: Some(
            prop(&["STRUCTURAL_SECTION_COMMON_MOMENT_OF_INERTIA_WEAK_AXIS"])
                .unwrap_or(defaults.iy),
        ),
        jxx: Some(
            prop(&["STRUCTURAL_SECTION_COMMON_TORSIONAL_MOMENT_OF_INERTIA"])
                .unwrap_or(defaults.jxx),
        ),
        extra,
    }
}

fn material(record: &Value) -> Material {
    match record
        .get("material")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("concrete") => Material::Concrete,
        _ => Material::Steel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw_export() -> Value {
        json!({
            "analytical_members": [
                {
                    "id": 7, "nodeI": 1, "nodeJ": 2,
                    "endpoints": {"i": [0.0, 0.0, 0.0], "j": [6.0, 0.0, 0.0]},
                    "section": {"type_id": 3, "type_name": "W310X39", "family_name": "W-Wide Flange"},
                    "section_properties": {"STRUCTURAL_SECTION_AREA": 0.00494},
                    "structural_role": "Beam"
                },
                {
                    "id": 8, "nodeI": "2", "nodeJ": 3,
                    "endpoints": {"I": [6.0, 0.0, 0.0], "J": [6.0, 0.0, 3.0]},
                    "section": {"type_id": 3}
                }
            ]
        })
    }

    #[test]
    fn builds_model_from_member_records() {
        let model = normalize_export(&raw_export()).unwrap();

        assert_eq!(model.nodes.len(), 3);
        assert_eq!(model.lines.len(), 2);
        assert_eq!(model.cross_sections.len(), 1);
        assert_eq!(model.members[0].role, Some(StructuralRole::Beam));

        let section = &model.cross_sections[0];
        assert_eq!(section.name, "W310X39");
        assert_eq!(section.area, Some(0.00494));
        assert_eq!(section.iz, Some(1e-4));
        assert_eq!(section.b, Some(0.3));
    }

    #[test]
    fn normalized_document_passes_through() {
        let model = normalize_export(&raw_export()).unwrap();
        let value = serde_json::to_value(&model).unwrap();
        assert_eq!(normalize_export(&value).unwrap(), model);
    }

    #[test]
    fn member_without_nodes_is_reported() {
        let mut raw = raw_export();
        raw["analytical_members"][1]
            .as_object_mut()
            .unwrap()
            .remove("nodeJ");

        let err = normalize_export(&raw).unwrap_err();
        assert_eq!(
            err.issues(),
            &[ValidationIssue::invalid(
                "analytical_members[1].nodeJ",
                "missing node id"
            )]
        );
    }

    #[test]
    fn empty_export_is_an_error() {
        assert!(matches!(
            normalize_export(&json!({"members": []})),
            Err(ModelError::EmptyExport)
        ));
        assert!(matches!(
            normalize_export(&json!({"foo": 1})),
            Err(ModelError::Validation(_))
        ));
    }

    #[test]
    fn envelope_preserves_raw_export() {
        let raw = json!({"members": []});
        let envelope = error_envelope(raw.clone(), &ModelError::EmptyExport);
        assert_eq!(envelope["raw"], raw);
        assert_eq!(envelope["error"]["kind"], "empty_export");
    }
}
