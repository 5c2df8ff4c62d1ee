//! The write-once terrain dataset descriptor handed to the finalizer.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ubersurf::{CoverageId, RasterExtent};

use crate::layout::TilingParameters;

pub const DESCRIPTOR_FILE_NAME: &str = "terrain.json";

/// Per-cell samples per edge of a coverage layer, as a multiple of the node dimension.
pub const LAYER_RESOLUTION_MULTIPLIER: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageLayerDescriptor {
    /// Uber-surface the layer's cells are cut from.
    pub source: PathBuf,
    pub id: CoverageId,
    pub cell_resolution: RasterExtent,
    pub stride: u32,
    /// Layer specific, e.g. a sub-sampling factor.
    pub param: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainDatasetConfig {
    output_dir: PathBuf,
    cell_grid: RasterExtent,
    tiling: TilingParameters,
    layers: Vec<CoverageLayerDescriptor>,
}

impl TerrainDatasetConfig {
    pub fn new(output_dir: impl Into<PathBuf>, cell_grid: RasterExtent, tiling: TilingParameters) -> Self {
        Self {
            output_dir: output_dir.into(),
            cell_grid,
            tiling,
            layers: Vec::new(),
        }
    }

    pub fn add_coverage_layer(&mut self, layer: CoverageLayerDescriptor) {
        self.layers.push(layer);
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Size of the dataset in cells.
    pub fn cell_grid(&self) -> RasterExtent {
        self.cell_grid
    }

    pub fn tiling(&self) -> &TilingParameters {
        &self.tiling
    }

    pub fn layers(&self) -> &[CoverageLayerDescriptor] {
        &self.layers
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.output_dir.join(DESCRIPTOR_FILE_NAME)
    }
}

/// A coverage layer asked for on the command line: `<channel>[:<param>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerRequest {
    pub id: CoverageId,
    pub param: u32,
}

impl LayerRequest {
    pub fn new(id: CoverageId, param: u32) -> Self {
        Self { id, param }
    }
}

impl FromStr for LayerRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, param) = match s.split_once(':') {
            Some((id, param)) => {
                let param = param
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| format!("bad layer parameter in '{}'", s))?;
                (id, param)
            }
            None => (s, 0),
        };

        Ok(Self::new(id.parse()?, param))
    }
}
