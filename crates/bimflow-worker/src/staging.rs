//! Per-job staging directories
//!
//! The job directory is the only channel between the orchestrator and an
//! external worker. Files the orchestrator writes itself are read back by
//! exact name; files a worker produces are found by modification time,
//! because the worker chooses their names.

use crate::error::StagingError;
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::debug;
use ulid::Ulid;

/// Normalized extraction result
pub const OUTPUT_JSON: &str = "output.json";
/// Edit instructions consumed by the update worker
pub const INPUT_JSON: &str = "input.json";
/// Pointer to the raw extraction output
pub const POINTER_FILE: &str = "latest_pointer.txt";
/// Stem of the promoted update result
pub const UPDATED_MODEL_STEM: &str = "updated_model";
/// Model and settings staged for the analysis engine
pub const ANALYSIS_INPUT_JSON: &str = "analysis_input.json";
/// Normalized analysis results
pub const ANALYSIS_RESULTS_JSON: &str = "analysis_results.json";
/// Subdirectory holding run reports
pub const REPORTS_DIR: &str = "reports";

/// Job identifier, sortable by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Generate new job ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// File-name glob (`*` and `?` wildcards), matched case-insensitively
///
/// Names listed in `excluding` never match, whatever the glob says.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    glob: String,
    regex: Regex,
    excluded: Vec<String>,
}

impl ArtifactPattern {
    /// Compile a glob
    pub fn new(glob: &str) -> Result<Self, StagingError> {
        let mut source = String::with_capacity(glob.len() + 8);
        source.push('^');
        for c in glob.chars() {
            match c {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                c => source.push_str(&regex::escape(&c.to_string())),
            }
        }
        source.push('$');

        let regex = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| StagingError::InvalidPattern {
                pattern: glob.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
            excluded: Vec::new(),
        })
    }

    /// Exclude exact file names
    #[must_use]
    pub fn excluding(mut self, names: &[&str]) -> Self {
        self.excluded
            .extend(names.iter().map(|n| n.to_ascii_lowercase()));
        self
    }

    /// Whether a file name matches
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name) && !self.excluded.contains(&name.to_ascii_lowercase())
    }

    /// The glob this pattern was built from
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

impl std::fmt::Display for ArtifactPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.glob)
    }
}

/// A candidate file in a job directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    /// File name
    pub name: String,
    /// Full path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

impl ArtifactInfo {
    /// Modification time as a UTC timestamp
    #[must_use]
    pub fn modified_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.modified)
    }
}

/// Root of all job directories
#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
}

impl StagingStore {
    /// Create a store rooted at `root`
    ///
    /// A relative root is resolved against the current directory so that
    /// every path handed to a worker is absolute.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map_err(|e| StagingError::io(&root, e))?
                .join(root)
        };
        Ok(Self { root })
    }

    /// Store root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one job
    #[must_use]
    pub fn job_dir(&self, job: &JobId) -> PathBuf {
        self.root.join(job.to_string())
    }

    /// Allocate a new job and create its directory
    pub async fn create_job(&self) -> Result<JobId, StagingError> {
        let job = JobId::new();
        let dir = self.job_dir(&job);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StagingError::io(&dir, e))?;
        debug!(job = %job, dir = %dir.display(), "job directory created");
        Ok(job)
    }

    /// Whether a job directory exists
    pub async fn job_exists(&self, job: &JobId) -> bool {
        fs::metadata(self.job_dir(job))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Stage an input artifact
    ///
    /// Staged inputs are immutable: staging over an existing file fails with
    /// [`StagingError::AlreadyStaged`].
    pub async fn stage(
        &self,
        job: &JobId,
        artifact: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StagingError> {
        let path = self.artifact_path(job, artifact)?;
        if fs::try_exists(&path)
            .await
            .map_err(|e| StagingError::io(&path, e))?
        {
            return Err(StagingError::AlreadyStaged(path));
        }
        self.write_at(&path, bytes).await?;
        Ok(path)
    }

    /// Write an orchestrator-owned artifact, replacing any previous content
    pub async fn write(
        &self,
        job: &JobId,
        artifact: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StagingError> {
        let path = self.artifact_path(job, artifact)?;
        self.write_at(&path, bytes).await?;
        Ok(path)
    }

    /// Read an artifact
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, StagingError> {
        fs::read(path).await.map_err(|e| StagingError::io(path, e))
    }

    /// Locate an orchestrator-owned artifact by exact name
    pub async fn discover_by_exact_name(
        &self,
        job: &JobId,
        artifact: &str,
    ) -> Result<PathBuf, StagingError> {
        let path = self.artifact_path(job, artifact)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(self.not_found(job, artifact)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(self.not_found(job, artifact))
            }
            Err(e) => Err(StagingError::io(&path, e)),
        }
    }

    /// Newest file matching `pattern`
    pub async fn discover_newest(
        &self,
        job: &JobId,
        pattern: &ArtifactPattern,
    ) -> Result<ArtifactInfo, StagingError> {
        newest(self.snapshot(job, pattern).await?)
            .ok_or_else(|| self.not_found(job, pattern.as_str()))
    }

    /// Newest file matching `pattern` modified at or after `since`
    pub async fn discover_newest_since(
        &self,
        job: &JobId,
        pattern: &ArtifactPattern,
        since: SystemTime,
    ) -> Result<ArtifactInfo, StagingError> {
        let candidates = self
            .snapshot(job, pattern)
            .await?
            .into_iter()
            .filter(|a| a.modified >= since)
            .collect();
        newest(candidates).ok_or_else(|| self.not_found(job, pattern.as_str()))
    }

    /// All regular files matching `pattern`, sorted by name
    pub async fn snapshot(
        &self,
        job: &JobId,
        pattern: &ArtifactPattern,
    ) -> Result<Vec<ArtifactInfo>, StagingError> {
        let dir = self.job_dir(job);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| StagingError::io(&dir, e))?;

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StagingError::io(&dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !pattern.matches(&name) {
                continue;
            }
            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                // removed between listing and stat
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StagingError::io(&path, e)),
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().map_err(|e| StagingError::io(&path, e))?;
            found.push(ArtifactInfo {
                name,
                path,
                size: meta.len(),
                modified,
            });
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    /// Log every candidate at debug level
    pub async fn log_snapshot(&self, job: &JobId, pattern: &ArtifactPattern, label: &str) {
        match self.snapshot(job, pattern).await {
            Ok(files) => {
                for file in &files {
                    debug!(
                        job = %job,
                        label,
                        name = %file.name,
                        size = file.size,
                        modified = %file.modified_utc().to_rfc3339(),
                        "staged artifact"
                    );
                }
                debug!(job = %job, label, count = files.len(), pattern = %pattern, "staging snapshot");
            }
            Err(e) => debug!(job = %job, label, error = %e, "staging snapshot unavailable"),
        }
    }

    /// Record which raw file a stage produced
    pub async fn write_pointer(&self, job: &JobId, target: &Path) -> Result<PathBuf, StagingError> {
        let text = format!("{}\n", target.display());
        self.write(job, POINTER_FILE, text.as_bytes()).await
    }

    /// Write a run report into the job's reports directory
    pub async fn write_report(
        &self,
        job: &JobId,
        name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StagingError> {
        self.artifact_path(job, name)?;
        let path = self.job_dir(job).join(REPORTS_DIR).join(name);
        self.write_at(&path, bytes).await?;
        Ok(path)
    }

    /// Copy a worker's result to its deterministic name
    ///
    /// The extension of `source` is kept. If `source` already has the
    /// deterministic name it is returned as is.
    pub async fn promote(
        &self,
        job: &JobId,
        source: &Path,
        stem: &str,
    ) -> Result<PathBuf, StagingError> {
        let name = match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem.to_string(),
        };
        let target = self.artifact_path(job, &name)?;
        if target == source {
            return Ok(target);
        }
        fs::copy(source, &target)
            .await
            .map_err(|e| StagingError::io(&target, e))?;
        debug!(job = %job, from = %source.display(), to = %target.display(), "artifact promoted");
        Ok(target)
    }

    fn artifact_path(&self, job: &JobId, artifact: &str) -> Result<PathBuf, StagingError> {
        if artifact.is_empty()
            || artifact == "."
            || artifact == ".."
            || artifact.contains(['/', '\\'])
        {
            return Err(StagingError::InvalidName(artifact.to_string()));
        }
        Ok(self.job_dir(job).join(artifact))
    }

    async fn write_at(&self, path: &Path, bytes: &[u8]) -> Result<(), StagingError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StagingError::io(parent, e))?;
        }
        fs::write(path, bytes)
            .await
            .map_err(|e| StagingError::io(path, e))
    }

    fn not_found(&self, job: &JobId, pattern: &str) -> StagingError {
        StagingError::ArtifactNotFound {
            pattern: pattern.to_string(),
            dir: self.job_dir(job),
        }
    }
}

/// Latest modification time wins; ties go to the lexically greatest name
fn newest(candidates: Vec<ArtifactInfo>) -> Option<ArtifactInfo> {
    candidates
        .into_iter()
        .max_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)))
}

/// Turn an arbitrary display name into a plain file name with extension `ext`
#[must_use]
pub fn safe_file_name(name: &str, ext: &str) -> String {
    let mut clean: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    clean = clean.trim_matches('.').to_string();
    if clean.is_empty() {
        clean = "model".to_string();
    }
    let suffix = format!(".{}", ext.trim_start_matches('.'));
    if !clean.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()) {
        clean.push_str(&suffix);
    }
    clean
}
