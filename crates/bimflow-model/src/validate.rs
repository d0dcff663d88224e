//! Referential integrity checks

use crate::error::ModelError;
use crate::types::{AnalyticalModel, SECTION_FIELDS};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// A single integrity or schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// A required top-level collection is absent or not an array
    MissingCollection {
        /// Collection key
        collection: String,
    },
    /// A field is missing or has the wrong shape
    InvalidField {
        /// JSON path of the offending value, e.g. `members[3].lineId`
        path: String,
        /// What is wrong with it
        reason: String,
    },
    /// Two entities in one collection share an id
    DuplicateId {
        /// Collection key
        collection: String,
        /// Duplicated id
        id: i64,
    },
    /// An entity references an id absent from the model
    DanglingReference {
        /// Collection of the referencing entity
        collection: String,
        /// Id of the referencing entity
        owner: i64,
        /// Referencing field
        field: String,
        /// Id that could not be resolved
        missing: i64,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCollection { collection } => {
                write!(f, "missing collection '{collection}'")
            }
            Self::InvalidField { path, reason } => write!(f, "{path}: {reason}"),
            Self::DuplicateId { collection, id } => write!(f, "duplicate id {id} in {collection}"),
            Self::DanglingReference {
                collection,
                owner,
                field,
                missing,
            } => write!(
                f,
                "{collection} {owner} references missing {field} {missing}"
            ),
        }
    }
}

impl ValidationIssue {
    pub(crate) fn dangling(collection: &str, owner: i64, field: &str, missing: i64) -> Self {
        Self::DanglingReference {
            collection: collection.to_string(),
            owner,
            field: field.to_string(),
            missing,
        }
    }

    pub(crate) fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Check that every id is unique within its collection and every reference
/// resolves.
///
/// All issues are collected before failing.
pub fn validate(model: &AnalyticalModel) -> Result<(), ModelError> {
    let mut issues = Vec::new();

    let nodes = unique_ids("nodes", model.nodes.iter().map(|n| n.id.0), &mut issues);
    let lines = unique_ids("lines", model.lines.iter().map(|l| l.id.0), &mut issues);
    let sections = unique_ids(
        "crossSections",
        model.cross_sections.iter().map(|s| s.id.0),
        &mut issues,
    );
    unique_ids("members", model.members.iter().map(|m| m.id.0), &mut issues);

    for (i, section) in model.cross_sections.iter().enumerate() {
        for key in section.extra.keys() {
            if SECTION_FIELDS.contains(&key.as_str()) {
                issues.push(ValidationIssue::invalid(
                    format!("crossSections[{i}].{key}"),
                    "metadata key shadows a section field",
                ));
            }
        }
    }

    for line in &model.lines {
        for (field, node) in [
            ("startNodeId", line.start_node_id),
            ("endNodeId", line.end_node_id),
        ] {
            if !nodes.contains(&node.0) {
                issues.push(ValidationIssue::dangling("lines", line.id.0, field, node.0));
            }
        }
    }

    for member in &model.members {
        if !lines.contains(&member.line_id.0) {
            issues.push(ValidationIssue::dangling(
                "members",
                member.id.0,
                "lineId",
                member.line_id.0,
            ));
        }
        if !sections.contains(&member.cross_section_id.0) {
            issues.push(ValidationIssue::dangling(
                "members",
                member.id.0,
                "crossSectionId",
                member.cross_section_id.0,
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ModelError::Validation(issues))
    }
}

fn unique_ids(
    collection: &str,
    ids: impl Iterator<Item = i64>,
    issues: &mut Vec<ValidationIssue>,
) -> HashSet<i64> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            issues.push(ValidationIssue::DuplicateId {
                collection: collection.to_string(),
                id,
            });
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CrossSection, Line, Member, Node};

    fn model() -> AnalyticalModel {
        AnalyticalModel {
            nodes: vec![Node::new(1, 0.0, 0.0, 0.0), Node::new(2, 5.0, 0.0, 0.0)],
            lines: vec![Line::new(10, 1, 2)],
            cross_sections: vec![CrossSection::named(100, "W310X39")],
            members: vec![Member::new(10, 10, 100)],
        }
    }

    #[test]
    fn valid_model_passes() {
        assert!(validate(&model()).is_ok());
        assert!(validate(&AnalyticalModel::default()).is_ok());
    }

    #[test]
    fn dangling_section_names_the_missing_id() {
        let mut m = model();
        m.members[0].cross_section_id = crate::SectionId(999);

        let err = validate(&m).unwrap_err();
        assert_eq!(
            err.issues(),
            &[ValidationIssue::dangling("members", 10, "crossSectionId", 999)]
        );
        assert!(err.to_string().contains("999"));
    }

    #[test]
    fn all_issues_are_collected() {
        let mut m = model();
        m.lines[0].end_node_id = crate::NodeId(3);
        m.nodes.push(Node::new(1, 1.0, 1.0, 1.0));

        let err = validate(&m).unwrap_err();
        assert_eq!(err.issues().len(), 2);
    }
}
