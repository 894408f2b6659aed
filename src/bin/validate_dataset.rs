//! validate_dataset - dataset pre-flight check
//!
//! Deletes stale `*.cache` files, then checks every image in each split for a
//! non-empty label. Exits 1 when any label is missing or empty, or when the
//! layout itself is broken.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Check image/label pairs in a detection dataset")]
struct Args {
    /// Dataset root containing one directory per split.
    #[arg(long, env = "EDGE_DATASET_ROOT")]
    root: PathBuf,

    /// Splits to check.
    #[arg(long, value_delimiter = ',', default_value = "train,valid,test")]
    splits: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let report = edge_detect::dataset::validate(&args.root, &args.splits)?;
    println!("{}", report);
    if !report.ok {
        bail!("dataset {} failed validation", args.root.display());
    }
    Ok(())
}
