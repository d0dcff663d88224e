//! Parameter edits applied to a model

use crate::error::ModelError;
use crate::types::{AnalyticalModel, MemberId, SectionId};
use crate::validate::ValidationIssue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A set of per-member section overrides
///
/// An instruction with no overrides and `revert_to_original` unset means no
/// change was requested. `revert_to_original` asks for the original model to
/// be restored, discarding earlier edits.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditInstruction {
    /// Section to assign per member
    #[serde(default)]
    pub overrides: BTreeMap<MemberId, SectionId>,
    /// Restore the original model
    #[serde(default)]
    pub revert_to_original: bool,
}

impl EditInstruction {
    /// Instruction restoring the original model
    #[inline]
    #[must_use]
    pub fn revert() -> Self {
        Self {
            overrides: BTreeMap::new(),
            revert_to_original: true,
        }
    }

    /// Add a section override for one member
    #[inline]
    #[must_use]
    pub fn with_override(mut self, member: MemberId, section: SectionId) -> Self {
        self.overrides.insert(member, section);
        self
    }

    /// Whether the instruction requests nothing
    #[must_use]
    pub fn is_no_change(&self) -> bool {
        self.overrides.is_empty() && !self.revert_to_original
    }

    /// Build an instruction from an engine's recommended sections
    #[must_use]
    pub fn from_recommendations(recommended: &BTreeMap<MemberId, SectionId>) -> Self {
        Self {
            overrides: recommended.clone(),
            revert_to_original: false,
        }
    }
}

/// Apply an edit instruction to a copy of `original`
///
/// The input is never mutated. Every override must name an existing member
/// and an existing cross section; members not named keep their section.
pub fn apply_edits(
    original: &AnalyticalModel,
    edits: &EditInstruction,
) -> Result<AnalyticalModel, ModelError> {
    if edits.revert_to_original && !edits.overrides.is_empty() {
        return Err(ModelError::ConflictingEdit {
            count: edits.overrides.len(),
        });
    }

    let mut issues = Vec::new();
    for (member, section) in &edits.overrides {
        if original.member(*member).is_none() {
            issues.push(ValidationIssue::invalid(
                format!("overrides.{member}"),
                format!("member {member} does not exist"),
            ));
        }
        if original.cross_section(*section).is_none() {
            issues.push(ValidationIssue::dangling(
                "members",
                member.0,
                "crossSectionId",
                section.0,
            ));
        }
    }
    if !issues.is_empty() {
        return Err(ModelError::Validation(issues));
    }

    let mut edited = original.clone();
    for member in &mut edited.members {
        if let Some(section) = edits.overrides.get(&member.id) {
            member.cross_section_id = *section;
        }
    }
    Ok(edited)
}
