use anyhow::Result;
use clap::Parser;
use stackwright::{Cli, Interactive, Pipeline, Unattended};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    config.logging.init();

    let pipeline = Pipeline::new(cli.target.clone(), config).assume_yes(cli.yes);
    let pipeline = if cli.non_interactive {
        pipeline.prompt(Unattended::new(cli.yes))
    } else {
        pipeline.prompt(Interactive::new())
    };

    pipeline.run(&cli.command)?;
    Ok(())
}
