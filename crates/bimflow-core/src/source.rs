//! Where original model bytes come from

use crate::error::FlowError;
use async_trait::async_trait;
use std::path::PathBuf;

/// Original model file contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedModel {
    /// File name as known to the source
    pub file_name: String,
    /// Contents
    pub bytes: Vec<u8>,
}

/// A byte source for the original model
///
/// Remote storage services implement this by downloading the file.
#[async_trait]
pub trait ModelSource: Send + Sync {
    /// Human readable origin, used in logs and errors
    fn origin(&self) -> String;

    /// Fetch the model
    async fn fetch(&self) -> Result<FetchedModel, FlowError>;
}

/// Model read from the local file system
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Source reading `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ModelSource for FileSource {
    fn origin(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<FetchedModel, FlowError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| FlowError::Source {
                origin: self.origin(),
                source,
            })?;
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "model".to_string(), |n| n.to_string_lossy().into_owned());
        Ok(FetchedModel { file_name, bytes })
    }
}

/// Model already held in memory, e.g. after a download
#[derive(Debug, Clone)]
pub struct BytesSource {
    model: FetchedModel,
}

impl BytesSource {
    /// Source yielding `bytes` under `file_name`
    #[must_use]
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            model: FetchedModel {
                file_name: file_name.into(),
                bytes,
            },
        }
    }
}

#[async_trait]
impl ModelSource for BytesSource {
    fn origin(&self) -> String {
        format!("memory:{}", self.model.file_name)
    }

    async fn fetch(&self) -> Result<FetchedModel, FlowError> {
        Ok(self.model.clone())
    }
}
