// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runner error type.

use pinflow_graph::{ExecutionError, GraphError};
use std::path::PathBuf;
use thiserror::Error;

/// Everything that can stop the runner
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Reading or writing a file failed
    #[error("{}: {source}", .path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Settings file is not valid RON
    #[error("invalid settings file: {0}")]
    SettingsParse(#[from] ron::error::SpannedError),

    /// Settings could not be encoded
    #[error("could not encode settings: {0}")]
    SettingsEncode(#[from] ron::Error),

    /// Settings file written by a newer version
    #[error("settings version {found} is newer than supported version {supported}")]
    UnsupportedSettings {
        /// Version in the file
        found: u32,
        /// Highest version this build reads
        supported: u32,
    },

    /// No graph document given
    #[error("no graph file given")]
    MissingGraph,

    /// Graph document could not be loaded
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The run failed
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Output could not be encoded
    #[error("could not encode output: {0}")]
    Output(#[from] serde_json::Error),
}

impl RunnerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
