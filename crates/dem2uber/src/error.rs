use std::io::{self, ErrorKind};
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can stop a conversion step. None of these are retried.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The source raster could not be probed, or reports a zero-area extent.
    #[error("Bad or missing input terrain config file ({})", .path.display())]
    BadInputConfig { path: PathBuf },

    /// A file could not be opened, created, sized or mapped.
    #[error("Couldn't access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An existing uber-surface is truncated or carries the wrong magic.
    #[error("Error while reading from {}: {source}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "Uber surface size is not divisible by cell size \
         (uber surface size: ({width}x{height}), cell size: ({cell_dim}))"
    )]
    Divisibility { width: u32, height: u32, cell_dim: u32 },

    #[error("User cancelled")]
    Cancelled,

    #[error("Invalid cell layout (node dimension {node_dim}, cell tree depth {cell_tree_depth})")]
    InvalidTiling { node_dim: u32, cell_tree_depth: u32 },

    #[error("Couldn't persist dataset descriptor {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = ConvertError> = std::result::Result<T, E>;

impl ConvertError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Sorts a failure to read an existing uber-surface into `Format`
    /// (bad contents) or `Io` (could not get at the file at all).
    pub(crate) fn uber_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        match source.kind() {
            ErrorKind::InvalidData | ErrorKind::UnexpectedEof => Self::Format {
                path: path.into(),
                source,
            },
            _ => Self::io(path, source),
        }
    }
}
