//! Environment contract handed to external workers
//!
//! These key names are read by externally authored automation scripts.
//! Renaming or removing one breaks every deployed script; treat them as a
//! published interface.

use crate::staging::{JobId, StagingStore, ANALYSIS_INPUT_JSON, INPUT_JSON};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Output directory for the analytical export (extract role)
pub const ANALYTICAL_OUT: &str = "REVIT_ANALYTICAL_OUT";
/// Path of the edit instructions (update role)
pub const UPDATE_JSON: &str = "REVIT_ANALYTICAL_UPDATE_JSON";
/// Output directory for the updated model (update role)
pub const SAVEAS_PATH: &str = "REVIT_ANALYTICAL_SAVEAS_PATH";
/// Staged analysis input (analyze role)
pub const ANALYSIS_INPUT: &str = "BIMFLOW_ANALYSIS_INPUT";
/// Output directory for analysis results (analyze role)
pub const ANALYSIS_OUT: &str = "BIMFLOW_ANALYSIS_OUT";

/// What the worker is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Export the analytical model from the BIM file
    Extract,
    /// Write edited sections back into the BIM file
    Update,
    /// Drive the analysis engine
    Analyze,
}

impl WorkerRole {
    /// Contract keys set for this role
    #[must_use]
    pub fn keys(self) -> &'static [&'static str] {
        match self {
            Self::Extract => &[ANALYTICAL_OUT],
            Self::Update => &[UPDATE_JSON, SAVEAS_PATH],
            Self::Analyze => &[ANALYSIS_INPUT, ANALYSIS_OUT],
        }
    }
}

/// Key to absolute path mapping injected into a worker's environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDescriptor {
    job: JobId,
    role: WorkerRole,
    entries: BTreeMap<&'static str, PathBuf>,
}

impl JobDescriptor {
    /// Build the contract for `role` in `job`'s directory
    #[must_use]
    pub fn build(store: &StagingStore, job: &JobId, role: WorkerRole) -> Self {
        let dir = store.job_dir(job);
        let entries = match role {
            WorkerRole::Extract => BTreeMap::from([(ANALYTICAL_OUT, dir)]),
            WorkerRole::Update => BTreeMap::from([
                (UPDATE_JSON, dir.join(INPUT_JSON)),
                (SAVEAS_PATH, dir),
            ]),
            WorkerRole::Analyze => BTreeMap::from([
                (ANALYSIS_INPUT, dir.join(ANALYSIS_INPUT_JSON)),
                (ANALYSIS_OUT, dir),
            ]),
        };
        Self {
            job: *job,
            role,
            entries,
        }
    }

    /// Job this descriptor belongs to
    #[must_use]
    pub fn job(&self) -> JobId {
        self.job
    }

    /// Role
    #[must_use]
    pub fn role(&self) -> WorkerRole {
        self.role
    }

    /// Value of one key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Path> {
        self.entries.get(key).map(PathBuf::as_path)
    }

    /// All entries, ordered by key
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Path)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_expose_exactly_their_keys() {
        let store = StagingStore::new("/srv/bimflow").unwrap();
        let job = JobId::new();
        for role in [WorkerRole::Extract, WorkerRole::Update, WorkerRole::Analyze] {
            let descriptor = JobDescriptor::build(&store, &job, role);
            let keys: Vec<_> = descriptor.iter().map(|(k, _)| k).collect();
            let mut expected = role.keys().to_vec();
            expected.sort_unstable();
            assert_eq!(keys, expected);
            assert!(descriptor.iter().all(|(_, p)| p.is_absolute()));
        }
    }

    #[test]
    fn update_points_at_input_json() {
        let store = StagingStore::new("/srv/bimflow").unwrap();
        let job = JobId::new();
        let descriptor = JobDescriptor::build(&store, &job, WorkerRole::Update);
        assert_eq!(
            descriptor.get(UPDATE_JSON),
            Some(store.job_dir(&job).join("input.json").as_path())
        );
        assert_eq!(descriptor.get(SAVEAS_PATH), Some(store.job_dir(&job).as_path()));
        assert_eq!(descriptor.get(ANALYTICAL_OUT), None);
    }
}
