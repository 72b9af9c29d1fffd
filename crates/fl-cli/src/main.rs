use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fl_cli::commands::{event, events, report, status, sync, track};
use fl_cli::{Cli, Commands, Config};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(fl_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = fl_db::Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let (mut db, config) = open_database(cli.config.as_deref())?;
    let mut stdout = io::stdout().lock();

    match command {
        Commands::Event(args) => {
            event::record(&mut stdout, &mut db, config.user_id()?, args)?;
        }
        Commands::Edit { id, event: args } => {
            event::edit(&mut stdout, &mut db, config.user_id()?, *id, args)?;
        }
        Commands::Delete { id } => {
            event::delete(&mut stdout, &mut db, *id)?;
        }
        Commands::Events { from, to, json } => {
            events::run(&mut stdout, &db, &config.user_id()?, *from, *to, *json)?;
        }
        Commands::Status { json } => {
            status::run(&mut stdout, &db, &config.user_id()?, *json)?;
        }
        Commands::Report(args) => {
            report::run(
                &mut stdout,
                &db,
                &config.user_id()?,
                report::Period::from(args),
                config.expected_daily_ms(),
                args.json,
            )?;
        }
        Commands::Track { sync } => {
            track::run(&mut stdout, db, &config, *sync)?;
        }
        Commands::Sync => {
            sync::run(&mut stdout, &mut db, &config)?;
        }
    }

    Ok(())
}
