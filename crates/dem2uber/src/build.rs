//! Uber-surface construction: probe the source, round its size up to whole
//! cells, then stream samples into a memory-mapped output and zero the
//! padding.

use std::fs::{self, File};
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;

use log::{debug, info};
use memmap2::Mmap;
use rayon::prelude::*;
use tiff::decoder::{ChunkType, Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::TiffError;
use ubersurf::{uber_surface_path, CoverageId, RasterExtent, UberSurfaceMut, SAMPLE_LEN};

use crate::diagnostics::Diagnostics;
use crate::error::{ConvertError, Result};
use crate::layout::CellLayout;
use crate::probe::{ByteOrder, SourceFormat, SourceRaster};
use crate::progress::{ensure_not_cancelled, Progress, ProgressStep};

/// Rows copied between two progress/cancellation polls.
pub const PROGRESS_ROWS: u32 = 16;

/// Smallest extent covering `source` whose sides are multiples of `clamping_dim`.
#[inline]
pub fn padded_extent(source: RasterExtent, clamping_dim: u32) -> Option<RasterExtent> {
    source.round_up_to(clamping_dim)
}

/// Builds the `channel` uber-surface in `output_dir` from `input` and
/// returns the resulting cell grid extent.
///
/// A failed or cancelled build leaves a partially written file behind.
/// Rebuilding with the same inputs produces the same bytes, so the caller
/// can simply run it again.
pub fn build_uber_surface(
    output_dir: &Path,
    input: &Path,
    channel: CoverageId,
    layout: CellLayout,
    progress: &dyn Progress,
    diagnostics: &dyn Diagnostics,
) -> Result<RasterExtent> {
    let init_step = progress.begin_step("Load source data", 1, false);

    let bad_input = || ConvertError::BadInputConfig {
        path: input.to_path_buf(),
    };

    let source = SourceRaster::probe(input, diagnostics)
        .filter(|source| !source.extent.is_empty())
        .ok_or_else(bad_input)?;

    let clamping_dim = layout.clamping_dim()?;
    let final_dims = padded_extent(source.extent, clamping_dim).ok_or_else(bad_input)?;

    fs::create_dir_all(output_dir).map_err(|err| ConvertError::io(output_dir, err))?;

    let out_path = uber_surface_path(output_dir, channel);
    info!(
        "Building {} uber surface {} -> {} ({} padded to {})",
        channel,
        input.display(),
        out_path.display(),
        source.extent,
        final_dims
    );

    let mut surface =
        UberSurfaceMut::create(&out_path, final_dims).map_err(|err| ConvertError::io(&out_path, err))?;

    match source.format {
        SourceFormat::AsciiGrid => copy_grid_rows(&source, &mut surface, init_step, progress)?,
        SourceFormat::Tiff => {
            copy_tiff_strips(&source, &mut surface, init_step, progress, diagnostics)?
        }
    }

    pad_surface(&mut surface, source.extent);

    surface
        .flush()
        .map_err(|err| ConvertError::io(&out_path, err))?;

    let cells = final_dims.divide_by(clamping_dim);
    info!("OK {} ({} cells of {} samples)", out_path.display(), cells, clamping_dim);

    Ok(cells)
}

/// Copies an ASCII-grid payload row by row, 16 rows per progress unit.
fn copy_grid_rows(
    source: &SourceRaster,
    surface: &mut UberSurfaceMut,
    mut init_step: Box<dyn ProgressStep + '_>,
    progress: &dyn Progress,
) -> Result<()> {
    let data_path = source.data_path();
    let file = File::open(&data_path).map_err(|err| ConvertError::io(&data_path, err))?;

    // Safety: the input is only read, and only for the duration of this copy.
    let input = unsafe { Mmap::map(&file) }.map_err(|err| ConvertError::io(&data_path, err))?;

    let src = source.extent;
    let dst = surface.extent();

    if (input.len() as u64) < src.area() * SAMPLE_LEN as u64 {
        debug!(
            "{}: {} bytes, expected {} for {}",
            data_path.display(),
            input.len(),
            src.area() * SAMPLE_LEN as u64,
            src
        );
        return Err(ConvertError::BadInputConfig { path: data_path });
    }

    init_step.advance();
    drop(init_step);

    let src_row_len = src.width as usize * SAMPLE_LEN;
    let copy_len = src.width.min(dst.width) as usize * SAMPLE_LEN;
    let copy_rows = src.height.min(dst.height);

    let copy_row = |surface: &mut UberSurfaceMut, y: u32| {
        let start = y as usize * src_row_len;
        let from = &input[start..start + copy_len];
        let to = &mut surface.row_bytes_mut(y)[..copy_len];

        match source.byte_order {
            ByteOrder::Little => to.copy_from_slice(from),
            ByteOrder::Big => {
                for (out, b) in to.chunks_exact_mut(SAMPLE_LEN).zip(from.chunks_exact(SAMPLE_LEN)) {
                    out.copy_from_slice(&[b[3], b[2], b[1], b[0]]);
                }
            }
        }
    };

    let mut step = progress.begin_step("Create uber surface data", copy_rows / PROGRESS_ROWS, true);

    let mut y = 0u32;
    while y + PROGRESS_ROWS <= copy_rows {
        ensure_not_cancelled(&*step)?;

        for row in y..y + PROGRESS_ROWS {
            copy_row(surface, row);
        }

        step.advance();
        y += PROGRESS_ROWS;
    }

    // Remainder rows left over after dividing by PROGRESS_ROWS.
    if y < copy_rows {
        ensure_not_cancelled(&*step)?;

        for row in y..copy_rows {
            copy_row(surface, row);
        }
    }

    Ok(())
}

fn tiff_error(path: &Path, err: TiffError) -> ConvertError {
    let source = match err {
        TiffError::IoError(err) => err,
        other => io::Error::new(ErrorKind::InvalidData, other.to_string()),
    };

    ConvertError::io(path, source)
}

/// TIFF `PlanarConfiguration` value for one plane per sample.
const PLANAR_SEPARATE: u16 = 2;

/// Decodes a TIFF strip by strip, one progress unit per strip. Strip `s`
/// starts at output row `s * rows_per_strip`; every decoded row is placed at
/// the output row stride so the padding columns stay untouched.
///
/// Multi-sample pixels keep their first sample. With separate planes only
/// the first plane's strips are read.
fn copy_tiff_strips(
    source: &SourceRaster,
    surface: &mut UberSurfaceMut,
    mut init_step: Box<dyn ProgressStep + '_>,
    progress: &dyn Progress,
    diagnostics: &dyn Diagnostics,
) -> Result<()> {
    let path = source.path.as_path();
    let file = File::open(path).map_err(|err| ConvertError::io(path, err))?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(|err| tiff_error(path, err))?;

    let src = source.extent;
    if decoder.get_chunk_type() == ChunkType::Tile {
        diagnostics.warning(
            "Tiff",
            &format!("{}: tiled layout is not supported", path.display()),
        );
        return Err(ConvertError::BadInputConfig {
            path: path.to_path_buf(),
        });
    }

    let rows_per_strip = decoder
        .find_tag_unsigned::<u32>(Tag::RowsPerStrip)
        .map_err(|err| tiff_error(path, err))?
        .unwrap_or(1)
        .max(1);
    let channels = decoder
        .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)
        .map_err(|err| tiff_error(path, err))?
        .unwrap_or(1)
        .max(1) as usize;
    let planar = decoder
        .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)
        .map_err(|err| tiff_error(path, err))?
        == Some(PLANAR_SEPARATE);
    let strip_count = decoder.strip_count().map_err(|err| tiff_error(path, err))?;

    let (strips, sample_stride) = if planar {
        (strip_count / channels as u32, 1)
    } else {
        (strip_count, channels)
    };

    if channels > 1 {
        diagnostics.warning(
            "Tiff",
            &format!("{}: {} samples per pixel, keeping the first", path.display(), channels),
        );
    }

    debug!(
        "{}: {} strips of {} rows{}",
        path.display(),
        strips,
        rows_per_strip,
        if planar { " (first plane)" } else { "" }
    );

    init_step.advance();
    drop(init_step);

    let width = src.width as usize;
    let mut warned_type = false;
    let mut step = progress.begin_step("Create uber surface data", strips, true);

    for strip in 0..strips {
        ensure_not_cancelled(&*step)?;

        let decoded = decoder
            .read_chunk(strip)
            .map_err(|err| tiff_error(path, err))?;

        if !warned_type && !matches!(decoded, DecodingResult::F32(_)) {
            diagnostics.warning(
                "Tiff",
                &format!("{}: samples are not 32-bit float, converting", path.display()),
            );
            warned_type = true;
        }
        let samples = decoded_to_f32(decoded).ok_or_else(|| ConvertError::BadInputConfig {
            path: path.to_path_buf(),
        })?;

        // The decoder only accepts strip counts that cover the image exactly.
        // Without a RowsPerStrip tag the single strip holds every row.
        let first_row = strip.saturating_mul(rows_per_strip);
        let rows = src.height.saturating_sub(first_row) as usize;

        let row_stride = width * sample_stride;
        for (r, row) in samples.chunks_exact(row_stride).take(rows).enumerate() {
            let y = first_row + r as u32;

            if sample_stride == 1 {
                surface.write_row(y, row);
            } else {
                let first: Vec<f32> = row.iter().step_by(sample_stride).copied().collect();
                surface.write_row(y, &first);
            }
        }

        step.advance();
    }

    Ok(())
}

/// Converts any supported sample type to `f32`. `None` for types this
/// build of the decoder knows about but we do not.
#[allow(unreachable_patterns)]
fn decoded_to_f32(decoded: DecodingResult) -> Option<Vec<f32>> {
    let samples = match decoded {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::U8(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::U16(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::U32(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::U64(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::I8(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::I16(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::I32(data) => data.iter().map(|&v| v as f32).collect(),
        DecodingResult::I64(data) => data.iter().map(|&v| v as f32).collect(),
        _ => return None,
    };

    Some(samples)
}

/// Zeroes everything outside the source rectangle. Must run after all
/// samples have been copied; rows are independent so they are filled in
/// parallel.
fn pad_surface(surface: &mut UberSurfaceMut, source: RasterExtent) {
    let dst = surface.extent();
    let row_len = dst.width as usize * SAMPLE_LEN;
    let data_len = source.width.min(dst.width) as usize * SAMPLE_LEN;
    let data_rows = source.height.min(dst.height) as usize;

    if dst.width <= source.width && dst.height <= source.height {
        return;
    }

    surface
        .payload_mut()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            if y < data_rows {
                row[data_len..].fill(0);
            } else {
                row.fill(0);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::LogDiagnostics;
    use crate::progress::NullProgress;
    use ubersurf::UberSurface;

    fn write_grid(dir: &Path, name: &str, extent: RasterExtent, f: impl Fn(u32, u32) -> f32) -> std::path::PathBuf {
        let hdr = dir.join(format!("{}.hdr", name));
        fs::write(
            &hdr,
            format!("ncols {}\nnrows {}\ncellsize 1\n", extent.width, extent.height),
        )
        .unwrap();

        let mut bytes = Vec::with_capacity(extent.area() as usize * SAMPLE_LEN);
        for y in 0..extent.height {
            for x in 0..extent.width {
                bytes.extend_from_slice(&f(x, y).to_le_bytes());
            }
        }
        fs::write(dir.join(format!("{}.flt", name)), bytes).unwrap();

        hdr
    }

    #[test]
    fn padding_is_minimal_and_aligned() {
        for clamping_dim in [1u32, 7, 32, 64] {
            for side in [1u32, 31, 32, 33, 100, 128] {
                let padded = padded_extent(RasterExtent::new(side, side + 1), clamping_dim).unwrap();

                assert!(padded.is_multiple_of(clamping_dim));
                assert!(padded.width >= side && padded.width - side < clamping_dim);
                assert!(padded.height > side && padded.height - (side + 1) < clamping_dim);
            }
        }
    }

    #[test]
    fn grid_source_is_copied_and_padded() {
        let dir = tempfile::tempdir().unwrap();
        let src = RasterExtent::new(20, 37);
        let input = write_grid(dir.path(), "dem", src, |x, y| (y * 1000 + x) as f32 + 0.5);
        let out = dir.path().join("out");

        let cells = build_uber_surface(
            &out,
            &input,
            CoverageId::HEIGHTS,
            CellLayout::new(8, 2),
            &NullProgress,
            &LogDiagnostics,
        )
        .unwrap();

        assert_eq!(cells, RasterExtent::new(2, 3));

        let surface = UberSurface::open(uber_surface_path(&out, CoverageId::HEIGHTS)).unwrap();
        assert_eq!(surface.extent(), RasterExtent::new(32, 48));

        for y in 0..48 {
            let row = surface.row(y).unwrap();
            for x in 0..32 {
                let expected = if x < src.width && y < src.height {
                    (y * 1000 + x) as f32 + 0.5
                } else {
                    0.0
                };
                assert_eq!(row[x as usize], expected, "sample ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn big_endian_grid_is_swapped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("be.hdr"), "ncols 2\nnrows 1\nbyteorder msbfirst\n").unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1.25f32.to_be_bytes());
        bytes.extend_from_slice(&(-3.0f32).to_be_bytes());
        fs::write(dir.path().join("be.flt"), bytes).unwrap();

        let out = dir.path().join("out");
        build_uber_surface(
            &out,
            &dir.path().join("be.flt"),
            CoverageId::HEIGHTS,
            CellLayout::new(4, 1),
            &NullProgress,
            &LogDiagnostics,
        )
        .unwrap();

        let surface = UberSurface::open(uber_surface_path(&out, CoverageId::HEIGHTS)).unwrap();
        assert_eq!(&*surface.row(0).unwrap(), &[1.25, -3.0, 0.0, 0.0]);
    }

    #[test]
    fn short_payload_is_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dem.hdr"), "ncols 4\nnrows 4\n").unwrap();
        fs::write(dir.path().join("dem.flt"), vec![0u8; 4 * 4 * 4 - 1]).unwrap();

        let err = build_uber_surface(
            &dir.path().join("out"),
            &dir.path().join("dem.hdr"),
            CoverageId::HEIGHTS,
            CellLayout::new(4, 1),
            &NullProgress,
            &LogDiagnostics,
        )
        .unwrap_err();

        assert!(matches!(err, ConvertError::BadInputConfig { .. }));
    }
}
