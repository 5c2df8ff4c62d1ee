//! Cell grid planning over a finished heights uber-surface.

use std::fs;
use std::path::Path;

use log::{debug, info};
use ubersurf::{read_extent, uber_surface_path, CoverageId, RasterExtent};

use crate::dataset::{
    CoverageLayerDescriptor, LayerRequest, TerrainDatasetConfig, LAYER_RESOLUTION_MULTIPLIER,
};
use crate::error::{ConvertError, Result};
use crate::finalize::DatasetFinalizer;
use crate::layout::TilingParameters;
use crate::progress::Progress;

/// Builds the dataset descriptor without handing it on.
///
/// Reads the heights extent from `uber_dir`, checks it divides into whole
/// cells, creates `output_dir` and lists one coverage layer per request.
pub fn plan_cell_grid(
    output_dir: &Path,
    uber_dir: &Path,
    tiling: TilingParameters,
    layers: &[LayerRequest],
) -> Result<TerrainDatasetConfig> {
    let heights = uber_surface_path(uber_dir, CoverageId::HEIGHTS);
    let extent = read_extent(&heights).map_err(|err| ConvertError::uber_read(&heights, err))?;

    let cell_dim = tiling.layout.clamping_dim()?;
    if !extent.is_multiple_of(cell_dim) {
        return Err(ConvertError::Divisibility {
            width: extent.width,
            height: extent.height,
            cell_dim,
        });
    }

    fs::create_dir_all(output_dir).map_err(|err| ConvertError::io(output_dir, err))?;

    let cell_grid = extent.divide_by(cell_dim);
    let mut config = TerrainDatasetConfig::new(output_dir, cell_grid, tiling);

    let layer_dim = tiling
        .layout
        .node_dim
        .checked_mul(LAYER_RESOLUTION_MULTIPLIER)
        .ok_or(ConvertError::InvalidTiling {
            node_dim: tiling.layout.node_dim,
            cell_tree_depth: tiling.layout.cell_tree_depth,
        })?;
    for request in layers {
        let source = uber_surface_path(uber_dir, request.id);
        debug!("Layer {} <- {}", request.id, source.display());

        config.add_coverage_layer(CoverageLayerDescriptor {
            source,
            id: request.id,
            cell_resolution: RasterExtent::new(layer_dim, layer_dim),
            stride: 1,
            param: request.param,
        });
    }

    info!(
        "Planned {} cells of {} samples over {} ({} layers)",
        cell_grid,
        cell_dim,
        extent,
        config.layers().len()
    );

    Ok(config)
}

/// Plans the cell grid and hands the finished descriptor to `finalizer`.
pub fn plan_dataset(
    output_dir: &Path,
    uber_dir: &Path,
    tiling: TilingParameters,
    layers: &[LayerRequest],
    finalizer: &dyn DatasetFinalizer,
    progress: &dyn Progress,
) -> Result<TerrainDatasetConfig> {
    let config = plan_cell_grid(output_dir, uber_dir, tiling, layers)?;
    finalizer.finalize(&config, uber_dir, progress)?;
    Ok(config)
}
