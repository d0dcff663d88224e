//! Analysis settings and results

use crate::types::{MemberId, SectionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings for one analysis run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisSettings {
    /// Point load applied at every node, in kN
    pub load_magnitude_kn: f64,
    /// Allowable member deflection, in mm
    pub allowable_deformation_mm: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            load_magnitude_kn: 1.0,
            allowable_deformation_mm: 10.0,
        }
    }
}

/// Results of one analysis run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResults {
    /// Load case the displacements were read from
    pub load_case: u32,
    /// Maximum section displacement per member, in mm
    pub member_displacements: BTreeMap<MemberId, f64>,
    /// Sections the engine proposes per member
    #[serde(default)]
    pub recommended_sections: BTreeMap<MemberId, SectionId>,
}

/// Serviceability verdict for one member
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberCheck {
    /// Member
    pub member: MemberId,
    /// Absolute maximum displacement, in mm
    pub displacement_mm: f64,
    /// Displacement over allowable
    pub utilization: f64,
    /// Whether the member is within the allowable deformation
    pub passes: bool,
}

/// Serviceability verdicts for all members of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceabilityReport {
    /// Allowable deformation used, in mm
    pub allowable_deformation_mm: f64,
    /// Per-member verdicts, in member id order
    pub checks: Vec<MemberCheck>,
}

impl ServiceabilityReport {
    /// Members exceeding the allowable deformation
    pub fn failing(&self) -> impl Iterator<Item = &MemberCheck> {
        self.checks.iter().filter(|c| !c.passes)
    }

    /// Whether every member passes
    #[must_use]
    pub fn all_pass(&self) -> bool {
        self.checks.iter().all(|c| c.passes)
    }
}

/// Compare each member's displacement with the allowable deformation
#[must_use]
pub fn check_serviceability(
    results: &AnalysisResults,
    settings: &AnalysisSettings,
) -> ServiceabilityReport {
    let allowable = settings.allowable_deformation_mm;
    let checks = results
        .member_displacements
        .iter()
        .map(|(member, displacement)| {
            let magnitude = displacement.abs();
            let utilization = if allowable > 0.0 {
                magnitude / allowable
            } else {
                f64::INFINITY
            };
            MemberCheck {
                member: *member,
                displacement_mm: magnitude,
                utilization,
                passes: magnitude <= allowable,
            }
        })
        .collect();

    ServiceabilityReport {
        allowable_deformation_mm: allowable,
        checks,
    }
}
