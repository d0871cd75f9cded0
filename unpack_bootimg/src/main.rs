//! Unpacks a boot or vendor-boot image into a working directory of payload
//! files plus a `.parserconfig` sidecar.

use std::path::PathBuf;
use std::time::Instant;

use abootkit::orchestrate;
use anyhow::Context;
use clap::Parser;

/// Unpacks an Android boot or vendor_boot image into a working directory.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the boot, recovery, or vendor_boot image
    #[arg(long = "boot_img")]
    boot_img: PathBuf,

    /// Parent directory under which the unpacked working tree is created
    #[arg(long, default_value = "out")]
    out: PathBuf,

    /// Desired name for the working subdirectory; deduplicated with a
    /// numeric suffix on collision
    #[arg(long)]
    name: Option<String>,

    /// Decompress and cpio-extract each ramdisk into a directory, instead of
    /// leaving it as a single payload file
    #[arg(long)]
    decode_ramdisk: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let start = Instant::now();
    let result = orchestrate::unpack(&args.boot_img, &args.out, args.name.as_deref(), args.decode_ramdisk);
    let elapsed = start.elapsed().as_secs_f64();

    match result {
        Ok(out_dir) => {
            log::info!("done in {elapsed:.3}s");
            println!("{}", out_dir.display());
            Ok(())
        }
        Err(e) => {
            log::info!("failed in {elapsed:.3}s");
            Err(e).context("unpacking image")
        }
    }
}
