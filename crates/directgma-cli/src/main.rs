//! `directgma` binary entry point.

use clap::Parser;
use console::style;
use directgma_cli::args::Cli;
use directgma_cli::exit::{exit_code, EXIT_GENERIC_FAIL};
use directgma_cli::logging::setup_logging;
use directgma_cli::output::OutputFormat;
use tracing::error;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli.log_level, cli.log_format) {
        eprintln!("{e:#}");
        std::process::exit(EXIT_GENERIC_FAIL);
    }

    match directgma_cli::execute(&cli, std::io::stdout().lock()) {
        Ok(reports) => {
            if cli.format == OutputFormat::Text {
                eprintln!("{} {} trial(s) verified", style("OK").green().bold(), reports.len());
            }
        }
        Err(e) => {
            error!("{}", e);
            let mut source = e.source();
            while let Some(err) = source {
                error!("  Caused by: {}", err);
                source = err.source();
            }
            std::process::exit(exit_code(&e));
        }
    }
}
