//! One session per engine installation
//!
//! The analysis engine is a single-instance desktop application, so two
//! sessions must never drive the same installation at once.

use crate::error::SessionError;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

static ACTIVE: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive claim on an installation, released on drop
#[derive(Debug)]
pub struct InstallationLease {
    key: PathBuf,
}

impl InstallationLease {
    /// Claim `installation`, failing with [`SessionError::Busy`] if held
    pub fn acquire(installation: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let key = installation.into();
        if !ACTIVE.lock().insert(key.clone()) {
            return Err(SessionError::Busy(key));
        }
        debug!(installation = %key.display(), "installation lease acquired");
        Ok(Self { key })
    }

    /// Claimed installation
    #[must_use]
    pub fn installation(&self) -> &Path {
        &self.key
    }

    /// Whether any lease is held on `installation`
    #[must_use]
    pub fn is_held(installation: &Path) -> bool {
        ACTIVE.lock().contains(installation)
    }
}

impl Drop for InstallationLease {
    fn drop(&mut self) {
        ACTIVE.lock().remove(&self.key);
        debug!(installation = %self.key.display(), "installation lease released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_lease_is_refused_until_release() {
        let key = PathBuf::from("/opt/engine/lease-test-overlap");
        let first = InstallationLease::acquire(&key).unwrap();
        assert!(matches!(
            InstallationLease::acquire(&key),
            Err(SessionError::Busy(k)) if k == key
        ));
        drop(first);
        assert!(!InstallationLease::is_held(&key));
        assert!(InstallationLease::acquire(&key).is_ok());
    }

    #[test]
    fn distinct_installations_do_not_conflict() {
        let a = InstallationLease::acquire("/opt/engine/lease-test-a").unwrap();
        let b = InstallationLease::acquire("/opt/engine/lease-test-b").unwrap();
        assert_ne!(a.installation(), b.installation());
    }
}
