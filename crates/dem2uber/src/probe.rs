//! Source raster probing: find out what an input file is and how big it is,
//! without decoding any samples.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::debug;
use tiff::decoder::Decoder;
use ubersurf::RasterExtent;

use crate::diagnostics::Diagnostics;

/// Input container kinds, resolved once from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// ESRI-style float grid: a `.hdr` text header next to a raw `.flt` payload.
    AsciiGrid,
    /// (Geo)TIFF with strip-encoded samples.
    Tiff,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();

        match ext.as_str() {
            "hdr" | "flt" => Some(Self::AsciiGrid),
            "tif" | "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }
}

/// Byte order of the raw samples in an ASCII-grid payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// What the probe learned from an ASCII-grid header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GridHeader {
    pub extent: RasterExtent,
    pub byte_order: ByteOrder,
}

/// Parses `<token> <value>` lines. Only `ncols`, `nrows` and `byteorder`
/// are looked at; token names are case-insensitive and order does not
/// matter. A missing or unparsable dimension stays 0.
pub fn parse_grid_header(text: &str) -> GridHeader {
    let mut header = GridHeader::default();

    for line in text.lines() {
        let line = line.trim_start();
        let Some((token, value)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim();

        if token.eq_ignore_ascii_case("ncols") {
            header.extent.width = leading_u32(value);
        } else if token.eq_ignore_ascii_case("nrows") {
            header.extent.height = leading_u32(value);
        } else if token.eq_ignore_ascii_case("byteorder") {
            header.byte_order = if value.eq_ignore_ascii_case("msbfirst")
                || value.eq_ignore_ascii_case("big_endian")
            {
                ByteOrder::Big
            } else {
                ByteOrder::Little
            };
        }
    }

    header
}

/// Leading decimal digits of `s` as a `u32`, after optional whitespace and
/// a `+` sign; 0 when there are none.
fn leading_u32(s: &str) -> u32 {
    let s = s.trim_start();
    let s = s.strip_prefix('+').unwrap_or(s);
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    s[..digits].parse().unwrap_or(0)
}

/// The `ext` file next to an ASCII-grid input. An input that already has
/// that extension is returned as is; an upper-case input extension gives an
/// upper-case sibling.
fn grid_sibling(path: &Path, ext: &str) -> PathBuf {
    match path.extension().and_then(|current| current.to_str()) {
        Some(current) if current.eq_ignore_ascii_case(ext) => path.to_path_buf(),
        Some(current) if current.bytes().all(|b| b.is_ascii_uppercase()) => {
            path.with_extension(ext.to_ascii_uppercase())
        }
        _ => path.with_extension(ext),
    }
}

/// A probed input: format, dimensions and where its samples live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRaster {
    pub path: PathBuf,
    pub format: SourceFormat,
    pub extent: RasterExtent,
    pub byte_order: ByteOrder,
}

impl SourceRaster {
    /// Probes `path`. Returns `None` only for an unrecognised extension; an
    /// unreadable source comes back with an empty extent.
    pub fn probe(path: &Path, diagnostics: &dyn Diagnostics) -> Option<Self> {
        let format = SourceFormat::from_path(path)?;

        let (extent, byte_order) = match format {
            SourceFormat::AsciiGrid => {
                let header = probe_grid_header(path, diagnostics);
                (header.extent, header.byte_order)
            }
            SourceFormat::Tiff => (probe_tiff(path, diagnostics), ByteOrder::Little),
        };

        debug!("Probed {} as {:?}: {}", path.display(), format, extent);

        Some(Self {
            path: path.to_path_buf(),
            format,
            extent,
            byte_order,
        })
    }

    /// The `.hdr` file describing an ASCII-grid source.
    pub fn header_path(&self) -> PathBuf {
        grid_sibling(&self.path, "hdr")
    }

    /// The file holding the samples.
    pub fn data_path(&self) -> PathBuf {
        match self.format {
            SourceFormat::AsciiGrid => grid_sibling(&self.path, "flt"),
            SourceFormat::Tiff => self.path.clone(),
        }
    }
}

/// Raw element-grid dimensions of `path`, or `(0, 0)` if it cannot be probed.
pub fn probe(path: &Path, diagnostics: &dyn Diagnostics) -> RasterExtent {
    SourceRaster::probe(path, diagnostics)
        .map(|source| source.extent)
        .unwrap_or(RasterExtent::EMPTY)
}

fn probe_grid_header(path: &Path, diagnostics: &dyn Diagnostics) -> GridHeader {
    let header_path = grid_sibling(path, "hdr");

    match fs::read(&header_path) {
        Ok(bytes) => parse_grid_header(&String::from_utf8_lossy(&bytes)),
        Err(err) => {
            diagnostics.warning(
                "Grid header",
                &format!("{}: {}", header_path.display(), err),
            );
            GridHeader::default()
        }
    }
}

fn probe_tiff(path: &Path, diagnostics: &dyn Diagnostics) -> RasterExtent {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            diagnostics.warning("Tiff", &format!("{}: {}", path.display(), err));
            return RasterExtent::EMPTY;
        }
    };

    let dims = Decoder::new(BufReader::new(file)).and_then(|mut decoder| decoder.dimensions());

    match dims {
        Ok((width, height)) => RasterExtent::new(width, height),
        Err(err) => {
            diagnostics.warning("Tiff", &format!("{}: {}", path.display(), err));
            RasterExtent::EMPTY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::LogDiagnostics;

    #[test]
    fn dispatch_is_case_insensitive() {
        assert_eq!(SourceFormat::from_path(Path::new("a/dem.HDR")), Some(SourceFormat::AsciiGrid));
        assert_eq!(SourceFormat::from_path(Path::new("dem.flt")), Some(SourceFormat::AsciiGrid));
        assert_eq!(SourceFormat::from_path(Path::new("dem.Tif")), Some(SourceFormat::Tiff));
        assert_eq!(SourceFormat::from_path(Path::new("dem.tiff")), Some(SourceFormat::Tiff));
        assert_eq!(SourceFormat::from_path(Path::new("dem.png")), None);
        assert_eq!(SourceFormat::from_path(Path::new("dem")), None);
    }

    #[test]
    fn header_tokens_in_any_order() {
        let a = parse_grid_header("ncols 100\nnrows 50\ncellsize 30\n");
        let b = parse_grid_header("xllcorner 0.5\r\nNROWS   50\r\nNODATA_value -9999\r\nNCols\t100\r\n");

        assert_eq!(a.extent, RasterExtent::new(100, 50));
        assert_eq!(b.extent, RasterExtent::new(100, 50));
        assert_eq!(a.byte_order, ByteOrder::Little);
    }

    #[test]
    fn header_without_dimensions_is_empty() {
        let header = parse_grid_header("cellsize 30\nnodata_value -9999\nncols\n");
        assert!(header.extent.is_empty());

        let header = parse_grid_header("ncols abc\nnrows 12\n");
        assert_eq!(header.extent, RasterExtent::new(0, 12));
    }

    #[test]
    fn dimensions_parse_like_atoi() {
        let header = parse_grid_header("ncols +5\nnrows   +4xyz\n");
        assert_eq!(header.extent, RasterExtent::new(5, 4));

        let header = parse_grid_header("ncols -5\nnrows ++4\n");
        assert!(header.extent.is_empty());
    }

    #[test]
    fn byteorder_token() {
        let header = parse_grid_header("ncols 2\nnrows 2\nbyteorder MSBFIRST\n");
        assert_eq!(header.byte_order, ByteOrder::Big);

        let header = parse_grid_header("byteorder LSBFIRST\n");
        assert_eq!(header.byte_order, ByteOrder::Little);
    }

    #[test]
    fn probe_reads_sibling_header() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dem.hdr"), "ncols 7\nnrows 3\n").unwrap();

        let source = SourceRaster::probe(&dir.path().join("dem.flt"), &LogDiagnostics).unwrap();
        assert_eq!(source.extent, RasterExtent::new(7, 3));
        assert_eq!(source.data_path(), dir.path().join("dem.flt"));
        assert_eq!(source.header_path(), dir.path().join("dem.hdr"));
    }

    #[test]
    fn upper_case_grid_pair_is_found() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("DEM.HDR"), "ncols 5\nnrows 4\n").unwrap();

        let source = SourceRaster::probe(&dir.path().join("DEM.HDR"), &LogDiagnostics).unwrap();
        assert_eq!(source.extent, RasterExtent::new(5, 4));
        assert_eq!(source.header_path(), dir.path().join("DEM.HDR"));
        assert_eq!(source.data_path(), dir.path().join("DEM.FLT"));

        let source = SourceRaster::probe(&dir.path().join("DEM.FLT"), &LogDiagnostics).unwrap();
        assert_eq!(source.extent, RasterExtent::new(5, 4));
        assert_eq!(source.header_path(), dir.path().join("DEM.HDR"));
    }

    #[test]
    fn unreadable_sources_probe_empty() {
        let dir = tempfile::tempdir().unwrap();

        assert!(probe(&dir.path().join("missing.hdr"), &LogDiagnostics).is_empty());
        assert!(probe(&dir.path().join("missing.tif"), &LogDiagnostics).is_empty());
        assert!(probe(&dir.path().join("dem.asc"), &LogDiagnostics).is_empty());

        let junk = dir.path().join("junk.tif");
        fs::write(&junk, b"definitely not a tiff").unwrap();
        assert!(probe(&junk, &LogDiagnostics).is_empty());
    }
}
