//! Why a directory tree could not be walked at all.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A root that can not be walked.
///
/// Problems below the root never surface here, see [`crate::Error`].
#[derive(Debug, Error)]
pub enum WalkError {
    /// The path does not exist, or is something other than a directory.
    #[error("{} is not an existing directory", .0.display())]
    NotADirectory(PathBuf),

    /// The root directory exists but could not be opened for reading.
    #[error("failed to build directory enumerator for {}: {}", .path.display(), .source)]
    Enumerator {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WalkError {
    /// The root the error refers to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            WalkError::NotADirectory(path) => path,
            WalkError::Enumerator { path, .. } => path,
        }
    }
}
