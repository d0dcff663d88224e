//! bimflow Analytical Model
//!
//! The normalized structural model exchanged between the BIM export worker,
//! the parameter editor, the analysis engine and the BIM update worker.
//!
//! # Core Concepts
//!
//! - [`AnalyticalModel`]: nodes, lines, cross sections and members
//! - [`parse`] / [`serialize`]: the JSON codec, validating referential integrity
//! - [`normalize_export`]: converts a raw BIM export into an [`AnalyticalModel`]
//! - [`EditInstruction`] / [`apply_edits`]: pure parameter edits
//! - [`AnalysisResults`]: per-member displacements and section recommendations
//!
//! # Example
//!
//! ```rust,ignore
//! use bimflow_model::{parse, serialize, apply_edits, EditInstruction, MemberId, SectionId};
//!
//! let model = parse(&std::fs::read_to_string("output.json")?)?;
//! let edits = EditInstruction::default().with_override(MemberId(7), SectionId(3));
//! let edited = apply_edits(&model, &edits)?;
//! std::fs::write("input.json", serialize(&edited)?)?;
//! ```

mod codec;
mod edit;
mod error;
mod normalize;
mod results;
mod types;
mod validate;

pub use codec::{parse, parse_value, serialize};
pub use edit::{apply_edits, EditInstruction};
pub use error::ModelError;
pub use normalize::{error_envelope, normalize_export, SectionDefaults};
pub use results::{
    check_serviceability, AnalysisResults, AnalysisSettings, MemberCheck, ServiceabilityReport,
};
pub use types::{
    AnalyticalModel, CrossSection, Line, LineId, Material, Member, MemberId, Node, NodeId,
    SectionId, StructuralRole, SECTION_FIELDS,
};
pub use validate::{validate, ValidationIssue};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
