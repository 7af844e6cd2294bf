use anyhow::Result;
use clap::Parser;
use gobfuscate::{init_logging, print_summary, run, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let report = run(&cli)?;
    print_summary(&cli, &report);
    Ok(())
}
