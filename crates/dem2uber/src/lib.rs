//! Conversion of elevation/coverage rasters into uber-surfaces and the
//! quadtree cell grid planned over them.
//!
//! Pipeline: [`probe`] → [`build::build_uber_surface`] (one file per
//! channel) → [`ubersurf::read_extent`] → [`plan::plan_dataset`] →
//! [`finalize::DatasetFinalizer`].

pub mod build;
pub mod dataset;
pub mod diagnostics;
pub mod error;
pub mod finalize;
pub mod layout;
pub mod plan;
pub mod probe;
pub mod progress;

pub use build::{build_uber_surface, padded_extent};
pub use dataset::{CoverageLayerDescriptor, LayerRequest, TerrainDatasetConfig};
pub use diagnostics::{Diagnostics, LogDiagnostics};
pub use error::{ConvertError, Result};
pub use finalize::{DatasetFinalizer, DescriptorWriter};
pub use layout::{CellLayout, TilingParameters};
pub use plan::{plan_cell_grid, plan_dataset};
pub use probe::{probe, SourceFormat, SourceRaster};
pub use progress::{LogProgress, NullProgress, Progress, ProgressStep};
