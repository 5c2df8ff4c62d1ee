use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use dem2uber::{
    build_uber_surface, plan_dataset, CellLayout, DescriptorWriter, LayerRequest, LogDiagnostics,
    LogProgress, TilingParameters,
};
use ubersurf::{CoverageId, UberSurface};

/// `dem2uber` - turns DEM rasters into uber-surfaces and plans the terrain
/// cell grid over them.
#[derive(Parser, Debug)]
#[command(name = "dem2uber", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build one channel's uber-surface from a `.hdr`/`.flt` grid or a GeoTIFF.
    Convert(ConvertArgs),
    /// Plan the cell grid over an existing uber-surface directory.
    Plan(PlanArgs),
    /// Convert the heights source, then plan over the result.
    Run(RunArgs),
    /// Print the dimensions stored in an uber-surface header.
    Inspect {
        path: PathBuf,
    },
}

#[derive(Args, Debug, Clone, Copy)]
struct CellArgs {
    /// Samples per edge of a leaf node.
    #[arg(long, env = "DEM2UBER_NODE_DIM", default_value_t = 32)]
    node_dim: u32,

    /// Quadtree depth of a cell (>= 1).
    #[arg(long, env = "DEM2UBER_CELL_TREE_DEPTH", default_value_t = 5)]
    cell_tree_depth: u32,
}

impl CellArgs {
    fn layout(self) -> CellLayout {
        CellLayout::new(self.node_dim, self.cell_tree_depth)
    }
}

#[derive(Args, Debug, Clone)]
struct ConvertArgs {
    /// Source raster (`.hdr`, `.flt`, `.tif`, `.tiff`).
    #[arg(long)]
    input: PathBuf,

    #[arg(long, env = "DEM2UBER_UBER_DIR", default_value = "uber")]
    output_dir: PathBuf,

    /// Coverage channel to write: `heights`, `shadows` or a numeric id.
    #[arg(long, default_value_t = CoverageId::HEIGHTS)]
    channel: CoverageId,

    #[command(flatten)]
    cells: CellArgs,
}

#[derive(Args, Debug, Clone)]
struct PlanArgs {
    /// Directory holding the uber-surfaces.
    #[arg(long, env = "DEM2UBER_UBER_DIR", default_value = "uber")]
    uber_dir: PathBuf,

    /// Directory the dataset descriptor is written to.
    #[arg(long, env = "DEM2UBER_OUTPUT_DIR", default_value = "cells")]
    output_dir: PathBuf,

    #[command(flatten)]
    cells: CellArgs,

    /// Samples shared between neighbouring cells.
    #[arg(long, default_value_t = 2)]
    overlap: u32,

    /// World-space distance between samples.
    #[arg(long, default_value_t = 10.0)]
    spacing: f32,

    /// Extra coverage layer as `<channel>[:<param>]`; repeatable.
    #[arg(long = "layer")]
    layers: Vec<LayerRequest>,
}

impl PlanArgs {
    fn tiling(&self) -> TilingParameters {
        TilingParameters::new(self.cells.layout(), self.overlap, self.spacing)
    }
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Heights source raster.
    #[arg(long)]
    input: PathBuf,

    #[command(flatten)]
    plan: PlanArgs,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let progress = LogProgress::new();
    let diagnostics = LogDiagnostics;

    match cli.command {
        Command::Convert(args) => {
            let cells = build_uber_surface(
                &args.output_dir,
                &args.input,
                args.channel,
                args.cells.layout(),
                &progress,
                &diagnostics,
            )
            .with_context(|| format!("converting {}", args.input.display()))?;

            info!("Cell grid: {}", cells);
        }
        Command::Plan(args) => {
            run_plan(&args, &progress)?;
        }
        Command::Run(args) => {
            let cells = build_uber_surface(
                &args.plan.uber_dir,
                &args.input,
                CoverageId::HEIGHTS,
                args.plan.cells.layout(),
                &progress,
                &diagnostics,
            )
            .with_context(|| format!("converting {}", args.input.display()))?;

            info!("Cell grid: {}", cells);
            run_plan(&args.plan, &progress)?;
        }
        Command::Inspect { path } => {
            let surface =
                UberSurface::open(&path).with_context(|| format!("reading {}", path.display()))?;
            println!("{}: {} samples", path.display(), surface.extent());
        }
    }

    Ok(())
}

fn run_plan(args: &PlanArgs, progress: &LogProgress) -> Result<()> {
    let config = plan_dataset(
        &args.output_dir,
        &args.uber_dir,
        args.tiling(),
        &args.layers,
        &DescriptorWriter,
        progress,
    )
    .with_context(|| format!("planning cells over {}", args.uber_dir.display()))?;

    info!(
        "Dataset {}: {} cells, {} coverage layers",
        config.output_dir().display(),
        config.cell_grid(),
        config.layers().len()
    );

    Ok(())
}
