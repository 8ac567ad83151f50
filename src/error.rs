use std::path::PathBuf;
use thiserror::Error;

use crate::config::validation::ValidationError;
use crate::iso::IsoError;

/// Failures of the image build pipeline. Everything except `InvalidKey`
/// aborts the run.
#[derive(Debug, Error)]
pub enum AutoinstallError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote lookup failed: {0}")]
    RemoteLookup(String),

    #[error("Failed to open image {}", path.display())]
    ImageOpen {
        path: PathBuf,
        #[source]
        source: IsoError,
    },

    #[error("Failed to edit image: {action}")]
    ImageEdit {
        action: String,
        #[source]
        source: IsoError,
    },

    #[error("Failed to write image {}", path.display())]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: IsoError,
    },

    #[error("Invalid SSH key {}: {reason}", path.display())]
    InvalidKey { path: PathBuf, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl AutoinstallError {
    pub fn edit(action: impl Into<String>) -> impl FnOnce(IsoError) -> Self {
        let action = action.into();
        move |source| AutoinstallError::ImageEdit { action, source }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, AutoinstallError::InvalidKey { .. })
    }
}
