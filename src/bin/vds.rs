use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tagsel::data::{create_virtual_file, Manifest, DEFAULT_PRIMARY};

/// Merge every container matching a pattern into one virtual file.
#[derive(Debug, Parser)]
#[command(name = "tagsel-vds", version)]
struct Args {
    /// Glob pattern of the containers to merge.
    pattern: String,
    /// Manifest path, defaults to `<parent of first match>/vds/vds.json`.
    output: Option<PathBuf>,
    /// Rewrite an existing manifest.
    #[arg(long)]
    overwrite: bool,
    /// Group whose merged row count is printed.
    #[arg(long, default_value = DEFAULT_PRIMARY)]
    group: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let path = create_virtual_file(&args.pattern, args.output.as_deref(), args.overwrite)
        .with_context(|| format!("creating virtual file for '{}'", args.pattern))?;
    let manifest = Manifest::load(&path)
        .with_context(|| format!("reading virtual file {}", path.display()))?;
    let rows = manifest.num_rows(&args.group)?;

    println!(
        "{}: {} source(s), {rows} rows in '{}'",
        path.display(),
        manifest.sources.len(),
        args.group
    );
    Ok(())
}
