//! JSON codec for [`AnalyticalModel`]
//!
//! Parsing goes element by element so a schema violation can name the exact
//! offending entry rather than a byte offset.

use crate::error::ModelError;
use crate::types::AnalyticalModel;
use crate::validate::{validate, ValidationIssue};
use serde::de::DeserializeOwned;
use serde_json::Value;

const COLLECTIONS: [&str; 4] = ["nodes", "lines", "crossSections", "members"];

/// Parse and validate a model document
pub fn parse(raw: &str) -> Result<AnalyticalModel, ModelError> {
    let value: Value = serde_json::from_str(raw)?;
    parse_value(&value)
}

/// Parse and validate an already-decoded model document
pub fn parse_value(value: &Value) -> Result<AnalyticalModel, ModelError> {
    let Some(object) = value.as_object() else {
        return Err(ModelError::issue(ValidationIssue::invalid(
            "$",
            "expected a JSON object",
        )));
    };

    if let (Some(error), Some(_)) = (object.get("error"), object.get("raw")) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        return Err(ModelError::Enveloped { message });
    }

    let mut issues = Vec::new();
    for key in COLLECTIONS {
        match object.get(key) {
            None => issues.push(ValidationIssue::MissingCollection {
                collection: key.to_string(),
            }),
            Some(v) if !v.is_array() => {
                issues.push(ValidationIssue::invalid(key, "expected an array"));
            }
            Some(_) => {}
        }
    }
    if !issues.is_empty() {
        return Err(ModelError::Validation(issues));
    }

    let model = AnalyticalModel {
        nodes: decode_collection(value, "nodes", &mut issues),
        lines: decode_collection(value, "lines", &mut issues),
        cross_sections: decode_collection(value, "crossSections", &mut issues),
        members: decode_collection(value, "members", &mut issues),
    };
    if !issues.is_empty() {
        return Err(ModelError::Validation(issues));
    }

    validate(&model)?;
    Ok(model)
}

/// Serialize a model to its canonical pretty-printed form
///
/// The output is deterministic: serializing equal models yields identical
/// bytes.
pub fn serialize(model: &AnalyticalModel) -> Result<String, ModelError> {
    Ok(serde_json::to_string_pretty(model)?)
}

fn decode_collection<T: DeserializeOwned>(
    root: &Value,
    key: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<T> {
    let items = root
        .get(key)
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match T::deserialize(item) {
            Ok(entity) => Some(entity),
            Err(err) => {
                issues.push(ValidationIssue::invalid(
                    format!("{key}[{index}]"),
                    err.to_string(),
                ));
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"{
        "nodes": [{"id": 1, "x": 0.0, "y": 0.0, "z": 0.0}, {"id": 2, "x": 6.0, "y": 0.0, "z": 0.0}],
        "lines": [{"id": 7, "startNodeId": 1, "endNodeId": 2}],
        "crossSections": [{"id": 3, "name": "W310X39", "A": 0.00494}],
        "members": [{"id": 7, "lineId": 7, "crossSectionId": 3, "material": "Steel"}]
    }"#;

    #[test]
    fn parses_minimal_model() {
        let model = parse(MINIMAL).unwrap();
        assert_eq!(model.nodes.len(), 2);
        assert_eq!(model.cross_sections[0].area, Some(0.00494));
    }

    #[test]
    fn empty_model_is_valid() {
        let model =
            parse(r#"{"nodes": [], "lines": [], "crossSections": [], "members": []}"#).unwrap();
        assert!(model.is_empty());
        let text = serialize(&model).unwrap();
        assert_eq!(parse(&text).unwrap(), model);
    }

    #[test]
    fn missing_collection_is_reported() {
        let err = parse(r#"{"nodes": [], "lines": [], "members": []}"#).unwrap_err();
        assert_eq!(
            err.issues(),
            &[ValidationIssue::MissingCollection {
                collection: "crossSections".into()
            }]
        );
    }

    #[test]
    fn malformed_entry_names_its_path() {
        let raw = MINIMAL.replace(r#""lineId": 7"#, r#""lineId": "seven""#);
        let err = parse(&raw).unwrap_err();
        match &err.issues()[0] {
            ValidationIssue::InvalidField { path, .. } => assert_eq!(path, "members[0]"),
            other => panic!("unexpected issue: {other:?}"),
        }
    }

    #[test]
    fn envelope_is_recognised() {
        let raw = r#"{"error": {"kind": "validation", "message": "bad"}, "raw": {}}"#;
        assert!(matches!(
            parse(raw),
            Err(ModelError::Enveloped { message }) if message == "bad"
        ));
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(parse("{nodes"), Err(ModelError::Json(_))));
    }
}
