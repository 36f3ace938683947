use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tagsel::mock::{write_mock_container, MockConfig};

/// Write a deterministic mock container with jets and tracks.
#[derive(Debug, Parser)]
#[command(name = "tagsel-mock", version)]
struct Args {
    /// Container directory to create.
    #[arg(short, long, default_value = "mock")]
    output: PathBuf,
    #[arg(short, long, default_value_t = 1_000)]
    num_jets: usize,
    #[arg(short, long, default_value_t = 42)]
    seed: u64,
    /// Track slots per jet.
    #[arg(long, default_value_t = 40)]
    num_tracks: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = MockConfig::new(args.num_jets)
        .with_seed(args.seed)
        .with_num_tracks(args.num_tracks);
    let path = write_mock_container(&args.output, &config)
        .with_context(|| format!("writing mock container {}", args.output.display()))?;

    println!("Wrote {} jets to {}", args.num_jets, path.display());
    Ok(())
}
