#![cfg_attr(docsrs, feature(doc_cfg))]
//! `turtle` keeps a MySQL schema in step with a directory of plain SQL scripts.
//!
//! Scripts are named `<sequence>.<slug>.sql` and applied in sequence order.
//! A tracking table in the target schema records which scripts have been
//! applied and when, optionally with the script text as it was at the time.
//!
//! # Concepts
//!
//! - [`ScriptStore`] discovers scripts on disk and creates new ones.
//! - [`AppliedStateStore`] owns the tracking table.
//! - [`MigrationSet`] joins the two: every script with its applied timestamp, if any.
//! - [`Executor`] applies scripts, each in its own transaction, or marks and
//!   unmarks them without running anything.
//! - [`AuditLogReader`] recovers schema-altering statements issued outside of
//!   migrations from the server's general query log.
//! - [`Session`] wires one invocation together and runs a [`Command`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use turtle::{Command, Config, Executor, Mode, Outcome, Session};
//!
//! # fn main() -> Result<(), turtle::Error> {
//! let config = Config::load(Path::new("turtle.yml"))?;
//! let conn = turtle::mysql::connect(&config.database)?;
//! let executor = Executor::new(config.applied_state_store(), Mode::Live)
//!     .on_script_complete(|filename, duration| {
//!         println!("{} applied in {:.3}s", filename, duration.as_secs_f64())
//!     });
//! let mut session = Session::open(config, conn, executor)?;
//!
//! if let Outcome::Applied(report) = session.run(Command::parse("apply", "new")?)? {
//!     if let Some(failure) = report.failure {
//!         eprintln!("{} failed: {}", failure.filename, failure.error);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Transactions on MySQL
//!
//! MySQL commits implicitly before and after most DDL statements. A script that
//! fails after running DDL keeps the effects of the statements that were
//! committed that way; only the tracking row and trailing DML are rolled back.

pub mod audit;
pub mod command;
pub mod config;
pub mod database;
mod error;
pub mod executor;
#[cfg(feature = "mysql")]
#[cfg_attr(docsrs, doc(cfg(feature = "mysql")))]
pub mod mysql;
pub mod reconcile;
pub mod script;
pub mod session;
pub mod state;

#[cfg(all(test, feature = "mysql-integration"))]
mod test_mysql;
#[cfg(test)]
mod test_sqlite;

pub use audit::{AuditEntry, AuditLog, AuditLogReader};
pub use command::{ApplyTarget, Command, DumpTarget, LogSince, Show, Target};
pub use config::{Config, DatabaseConfig, IncrementFormat, MigrationsConfig};
pub use database::{BatchError, Database, Echo, LogEvent};
pub use error::Error;
pub use executor::{ApplyReport, Executor, MarkReport, Mode, ScriptFailure, ScriptOutcome};
pub use reconcile::{MigrationEntry, MigrationSet};
pub use script::{sanitize_name, MigrationScript, ScriptStore, SequenceMode};
pub use session::{Outcome, Session};
pub use state::{AppliedRecord, AppliedStateStore, TrackingTable};
