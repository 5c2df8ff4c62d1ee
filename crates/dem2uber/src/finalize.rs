//! Hand-off point after planning: persist the descriptor and make sure every
//! layer has an uber-surface to be cut from.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use ubersurf::{read_extent, uber_surface_path, write_zeroed, CoverageId};

use crate::dataset::TerrainDatasetConfig;
use crate::error::{ConvertError, Result};
use crate::progress::{ensure_not_cancelled, Progress};

pub trait DatasetFinalizer {
    fn finalize(
        &self,
        config: &TerrainDatasetConfig,
        uber_dir: &Path,
        progress: &dyn Progress,
    ) -> Result<()>;
}

/// Writes `terrain.json` and fills in missing auxiliary uber-surfaces with
/// zeros at the heights surface's size. Cell files are produced later by
/// the renderer-side tooling from these inputs.
///
/// A zero-filled surface is a placeholder, not a computed layer: a missing
/// shadowing surface comes out fully unshadowed. Each one is logged as a
/// warning so the gap is visible before the renderer consumes it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DescriptorWriter;

impl DatasetFinalizer for DescriptorWriter {
    fn finalize(
        &self,
        config: &TerrainDatasetConfig,
        uber_dir: &Path,
        progress: &dyn Progress,
    ) -> Result<()> {
        persist_descriptor(config)?;
        generate_missing_uber_surfaces(config, uber_dir, progress)?;
        Ok(())
    }
}

pub fn persist_descriptor(config: &TerrainDatasetConfig) -> Result<PathBuf> {
    let path = config.descriptor_path();
    let file = File::create(&path).map_err(|err| ConvertError::io(&path, err))?;
    let mut writer = BufWriter::new(file);

    serde_json::to_writer_pretty(&mut writer, config).map_err(|source| ConvertError::Persist {
        path: path.clone(),
        source,
    })?;
    writer.flush().map_err(|err| ConvertError::io(&path, err))?;

    info!("Wrote dataset descriptor {}", path.display());
    Ok(path)
}

pub fn load_descriptor(path: &Path) -> Result<TerrainDatasetConfig> {
    let file = File::open(path).map_err(|err| ConvertError::io(path, err))?;

    serde_json::from_reader(BufReader::new(file)).map_err(|source| ConvertError::Persist {
        path: path.to_path_buf(),
        source,
    })
}

/// Zero-fills every layer source that does not exist yet and returns the
/// ids of the placeholders it wrote.
pub fn generate_missing_uber_surfaces(
    config: &TerrainDatasetConfig,
    uber_dir: &Path,
    progress: &dyn Progress,
) -> Result<Vec<CoverageId>> {
    let heights = uber_surface_path(uber_dir, CoverageId::HEIGHTS);
    let extent = read_extent(&heights).map_err(|err| ConvertError::uber_read(&heights, err))?;

    let mut step = progress.begin_step(
        "Generate missing uber surfaces",
        config.layers().len() as u32,
        false,
    );

    let mut placeholders = Vec::new();
    for layer in config.layers() {
        ensure_not_cancelled(&*step)?;

        if !layer.source.exists() {
            if let Some(parent) = layer.source.parent() {
                fs::create_dir_all(parent).map_err(|err| ConvertError::io(parent, err))?;
            }

            warn!(
                "No {} uber surface at {}, writing a zero-filled placeholder ({})",
                layer.id,
                layer.source.display(),
                extent
            );
            write_zeroed(&layer.source, extent).map_err(|err| ConvertError::io(&layer.source, err))?;
            placeholders.push(layer.id);
        }

        step.advance();
    }

    Ok(placeholders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CoverageLayerDescriptor;
    use crate::layout::{CellLayout, TilingParameters};
    use crate::progress::NullProgress;
    use ubersurf::{RasterExtent, UberHeader, UberSurface};

    #[test]
    fn only_missing_layers_get_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let extent = RasterExtent::new(4, 2);
        let mut heights = UberHeader::new(extent).encode().to_vec();
        heights.resize(heights.len() + extent.area() as usize * 4, 0);
        fs::write(uber_surface_path(dir.path(), CoverageId::HEIGHTS), &heights).unwrap();

        let existing = CoverageId(0x30);
        fs::write(uber_surface_path(dir.path(), existing), &heights).unwrap();

        let tiling = TilingParameters::new(CellLayout::new(2, 1), 2, 10.0);
        let mut config = TerrainDatasetConfig::new(dir.path(), RasterExtent::new(2, 1), tiling);
        for id in [CoverageId::ANGLE_BASED_SHADOWS, existing] {
            config.add_coverage_layer(CoverageLayerDescriptor {
                source: uber_surface_path(dir.path(), id),
                id,
                cell_resolution: RasterExtent::new(8, 8),
                stride: 1,
                param: 0,
            });
        }

        let placeholders = generate_missing_uber_surfaces(&config, dir.path(), &NullProgress).unwrap();
        assert_eq!(placeholders, vec![CoverageId::ANGLE_BASED_SHADOWS]);

        let shadows =
            UberSurface::open(uber_surface_path(dir.path(), CoverageId::ANGLE_BASED_SHADOWS)).unwrap();
        assert_eq!(shadows.extent(), extent);
        assert!(shadows.row(1).unwrap().iter().all(|&v| v == 0.0));

        let again = generate_missing_uber_surfaces(&config, dir.path(), &NullProgress).unwrap();
        assert!(again.is_empty());
    }
}
