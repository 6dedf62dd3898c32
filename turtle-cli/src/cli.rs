//! Command line arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use turtle::Command;

#[derive(Parser, Debug)]
#[command(name = "turtle", version, about = "Apply versioned SQL migration scripts to a MySQL schema")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Configuration file
    #[arg(short, long, global = true, env = "TURTLE_CONFIG", default_value = "turtle.yml")]
    pub config: PathBuf,

    /// Database password, overriding `database.pass` in the configuration file
    #[arg(long, global = true, env = "TURTLE_DB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Report what would be done without writing to the database or the migrations directory
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    /// Print every statement before it is sent to the server
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create a new, empty migration script
    Create {
        /// Description of the change; words are joined with hyphens
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    /// List migrations: new, applied or all
    Show {
        #[arg(default_value = "new")]
        which: String,
    },
    /// Record migrations as applied without running them: all or a filename
    Mark { target: String },
    /// Remove applied records without running anything: all or a filename
    Unmark { target: String },
    /// Run migrations: new or a filename
    Apply {
        #[arg(default_value = "new")]
        target: String,
    },
    /// Print CREATE TABLE statements: a table name, or * for every table
    Dump { table: String },
    /// Print schema changes recorded in the general query log since a timestamp, or - for the last checkpoint
    Log { since: String },
}

impl Commands {
    /// Validate the arguments into an engine command.
    pub fn to_command(&self) -> Result<Command, turtle::Error> {
        match self {
            Commands::Create { name } => Command::parse("create", &name.join(" ")),
            Commands::Show { which } => Command::parse("show", which),
            Commands::Mark { target } => Command::parse("mark", target),
            Commands::Unmark { target } => Command::parse("unmark", target),
            Commands::Apply { target } => Command::parse("apply", target),
            Commands::Dump { table } => Command::parse("dump", table),
            Commands::Log { since } => Command::parse("log", since),
        }
    }
}
