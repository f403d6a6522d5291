#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use cradle_cli::{run, Args};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let summary = run(&args)?;
    println!(
        "frames={} lag={} memory={}",
        summary.frame, summary.lag_count, summary.memory_digest
    );
    Ok(())
}
