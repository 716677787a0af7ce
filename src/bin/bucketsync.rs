//! Bucketsync CLI Binary

use bucketsync::logging::init_logging;
use bucketsync::tooling::cli::{Cli, CliContext, Commands};
use clap::Parser;
use std::process;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut context = match CliContext::new(cli.config.as_deref()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };
    context.apply_logging_flags(&cli);

    // Only a running node logs by default; one-shot commands keep stderr quiet
    // unless a level was asked for.
    let logs_wanted = matches!(cli.command, Commands::Serve(_)) || cli.log_level.is_some();
    if logs_wanted {
        let node_id = match &cli.command {
            Commands::Serve(args) => args.node_id.clone(),
            _ => None,
        }
        .unwrap_or_else(|| context.config().node_id.clone());

        if let Err(e) = init_logging(Some(&context.config().logging), Some(&node_id)) {
            eprintln!("Error initializing logging: {}", e);
            process::exit(1);
        }
    }

    match context.execute(&cli.command).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
