//! Rebuilds a boot or vendor-boot image from an unpacked working directory.

use std::path::PathBuf;
use std::time::Instant;

use abootkit::orchestrate;
use anyhow::Context;
use clap::Parser;

/// Rebuilds an Android boot or vendor_boot image from a previously unpacked
/// working directory.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Working directory produced by `unpack_bootimg`, containing a
    /// `.parserconfig` sidecar and payload files
    #[arg(long = "repack-dir")]
    repack_dir: Option<PathBuf>,

    /// Same as `--repack-dir`, given positionally
    work_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let work_dir = args
        .repack_dir
        .or(args.work_dir)
        .context("either --repack-dir or a working directory argument is required")?;

    let start = Instant::now();
    let result = orchestrate::build(&work_dir);
    let elapsed = start.elapsed().as_secs_f64();

    match result {
        Ok(image_path) => {
            log::info!("done in {elapsed:.3}s");
            println!("{}", image_path.display());
            Ok(())
        }
        Err(e) => {
            log::info!("failed in {elapsed:.3}s");
            Err(e).context("rebuilding image")
        }
    }
}
