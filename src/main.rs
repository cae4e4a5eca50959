//! rust_dge command-line interface

use clap::{CommandFactory, Parser};
use log::{info, LevelFilter};

use rust_dge::cli::{counts_config, microarray_config, Cli, Commands};
use rust_dge::error::Result;
use rust_dge::pipeline::{run_counts_pipeline, run_microarray_pipeline};

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let Some(command) = cli.command else {
        // No subcommand: show the overview instead of an error
        let _ = Cli::command().print_help();
        return;
    };

    if let Err(e) = run(&command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: &Commands) -> Result<()> {
    if let Some(config) = microarray_config(command)? {
        let out = run_microarray_pipeline(&config)?;
        info!(
            "{}: {} probes tested for {}, {} with adj.P.Val < 0.05",
            config.accession,
            out.table.n_rows(),
            out.contrast,
            out.table.adj_p_value.iter().filter(|&&p| p < 0.05).count()
        );
        for file in &out.files {
            info!("  {}", file.display());
        }
    } else if let Some(config) = counts_config(command)? {
        let out = run_counts_pipeline(&config)?;
        info!(
            "{} significant genes: {} up, {} down; {} files in {}",
            out.split.significant.n_genes(),
            out.split.up.n_genes(),
            out.split.down.n_genes(),
            out.files.len(),
            config.output_dir.display()
        );
    }
    Ok(())
}
