//! weft CLI entry point.
//!
//! Binary name: `weft`
//!
//! Parses CLI arguments, sets up tracing and configuration, then dispatches
//! to the command handler.

mod cli;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,weft=debug",
        _ => "trace",
    };
    if let Err(e) = weft_observe::tracing_setup::init_tracing(filter, cli.otel) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    // Shell completions don't need configuration
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "weft", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(weft_infra::config::default_config_path);
    let config = weft_infra::config::load_config(&config_path).await;

    let result = match cli.command {
        Commands::Validate { file } => cli::inspect::validate(&file, cli.json),
        Commands::Inspect { file } => cli::inspect::inspect(&file, cli.json),
        Commands::Run {
            file,
            template,
            params,
        } => {
            let source = cli::run::RunSource::from_args(file, template, &params)?;
            cli::run::run(source, &config, cli.json, cli.quiet).await
        }
        Commands::Templates => cli::templates::list_templates(cli.json),
        Commands::Completions { .. } => Ok(()),
    };

    weft_observe::tracing_setup::shutdown_tracing();
    result
}
