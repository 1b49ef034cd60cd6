use anyhow::Result;
use clap::Parser;
use habitforge::{
    cli::{run_cli, Args},
    utils::runtime::single_thread_runtime,
};
use tracing::error;

fn main() -> Result<()> {
    let args = Args::parse();
    single_thread_runtime()?
        .block_on(run_cli(args))
        .inspect_err(|e| {
            error!("Error running cli {e:?}");
        })?;
    Ok(())
}
