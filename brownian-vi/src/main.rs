use anyhow::Result;
use brownian_vi::cli::{plot, run, Cli, Commands};
use clap::Parser;

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(args) => {
            run(args)?;
        }
        Commands::Plot(args) => {
            plot(args)?;
        }
    }

    Ok(())
}
