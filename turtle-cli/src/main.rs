//! turtle - apply versioned SQL migration scripts to a MySQL schema

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use turtle::{Config, Database, Echo, Executor, Mode, Outcome, Session, Show};

mod cli;

use cli::Cli;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every script involved succeeded.
fn run(cli: &Cli) -> Result<bool> {
    let command = cli.command.to_command()?;
    let global = &cli.global;

    let mut config = Config::load(&global.config)?;
    if let Some(password) = &global.password {
        config.database.pass = password.clone();
    }

    let conn = turtle::mysql::connect(&config.database)?;
    let db: Box<dyn Database> = if global.verbose {
        Box::new(Echo::new(conn, |sql| println!("{}", sql.trim_end())))
    } else {
        Box::new(conn)
    };

    let mode = if global.dry_run {
        Mode::DryRun
    } else {
        Mode::Live
    };
    let executor = Executor::new(config.applied_state_store(), mode)
        .on_script_start(|filename| println!("Applying {}", filename))
        .on_script_complete(|filename, duration| {
            println!("{} applied in {:.6} seconds", filename, duration.as_secs_f64())
        })
        .on_script_error(|filename, error| eprintln!("{} failed: {}", filename, error))
        .on_dry_run(|filename, sql| println!("-- {}\n{}", filename, sql.trim_end()));

    let mut session = Session::open(config, db, executor)?;
    let outcome = session.run(command)?;
    let success = outcome.is_success();

    match outcome {
        Outcome::Created(script) => {
            if global.dry_run {
                println!("Would create {}", script.path().display());
            } else {
                println!("Created new migration file: {}", script.path().display());
            }
        }
        Outcome::Listing { show, entries } => {
            for entry in entries {
                match (show, entry.applied_at) {
                    (Show::New, _) | (_, None) => println!("[ ] {}", entry.filename()),
                    (Show::Applied, Some(at)) => {
                        println!("[x] {} on {}", entry.filename(), at.format(DATE_FORMAT))
                    }
                    (Show::All, Some(_)) => println!("[x] {}", entry.filename()),
                }
            }
        }
        Outcome::Marked(report) => {
            for filename in &report.changed {
                println!("Marked {} as applied", filename);
            }
            for failure in &report.failures {
                eprintln!("Could not mark {}: {}", failure.filename, failure.error);
            }
        }
        Outcome::Unmarked(report) => {
            for filename in &report.changed {
                println!("Unmarked {}", filename);
            }
            for failure in &report.failures {
                eprintln!("Could not unmark {}: {}", failure.filename, failure.error);
            }
        }
        Outcome::Applied(report) => {
            if report.applied.is_empty() && report.failure.is_none() {
                println!("Nothing to apply");
            }
            if let Some(failure) = &report.failure {
                eprintln!(
                    "Aborting, {} failed so no further migrations will be applied",
                    failure.filename
                );
            }
        }
        Outcome::Dumped(statements) => {
            for statement in statements {
                println!("{};\n", statement);
            }
        }
        Outcome::Log {
            entries,
            checkpoint,
        } => {
            for entry in &entries {
                println!("-- {}\n{};\n", entry.timestamp.format(DATE_FORMAT), entry.statement);
            }
            if global.dry_run {
                tracing::info!(checkpoint = %checkpoint, "Dry run, checkpoint not saved");
            } else {
                session
                    .config()
                    .with_checkpoint(checkpoint)
                    .save(&global.config)
                    .with_context(|| {
                        format!("failed to save checkpoint to {}", global.config.display())
                    })?;
            }
        }
    }

    Ok(success)
}
