//! Pointstream headless demo viewer
//!
//! Streams a point cloud through the full pipeline (conversion, octree
//! loading, traversal, node loading, caching and buffer management) against a
//! headless backend while the camera orbits the cloud. Diagnostics are logged
//! periodically.
//!
//! When the cloud has no converted output under the converted root yet, a
//! deterministic synthetic cloud is generated in its place.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p pointstream-viewer -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod synthetic;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::{Viewer, ViewerParams};

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let params = ViewerParams::from_args()?;
    info!(
        frames = params.frames,
        point_budget = params.settings.streaming.point_budget,
        loader_threads = params.settings.streaming.loader_threads,
        "starting viewer"
    );

    let mut viewer = Viewer::new(params);
    viewer.run();
    Ok(())
}

fn print_help() {
    eprintln!(
        "Pointstream headless demo viewer

USAGE:
    cargo run -p pointstream-viewer -- [OPTIONS]

CLOUD OPTIONS:
    --cloud <PATH>              Input cloud; its file stem names the output directory
                                Default: synthetic.xyz
    --converted-root <DIR>      Directory holding converted clouds (default: ConvertedClouds)
    --depth <N>                 Synthetic cloud octree depth (default: 3)
    --points-per-node <N>       Synthetic cloud points per node (default: 2000)
    --seed <N>                  Synthetic cloud seed (default: 42)

STREAMING OPTIONS:
    --settings <FILE>           JSON renderer settings; later flags override it
    --point-budget <N>          Points rendered per frame (default: 1000000)
    --cache-point-budget <N>    Points kept in the eviction cache (default: 5000000)
    --max-nodes-to-load <N>     Load requests per tick (default: 10)
    --max-nodes-to-render <N>   New node buffers per tick (default: 30)
    --min-node-size <F>         Smallest node size that is subdivided (default: 1.0)
    --loader-threads <N>        Concurrent node loads (default: 4)

RENDER OPTIONS:
    --point-size <F>            Point size in pixels (default: 1.5)
    --show-decimated            Draw the decimated preview instead of the octree
    --frames <N>                Frames to run (default: 600)
    --fps <N>                   Target frame rate (default: 60)

OTHER:
    -h, --help                  Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                    Set log level (e.g., info, debug, trace)"
    );
}
