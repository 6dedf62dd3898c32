//! One invocation: configuration, connection, scripts and tracking table,
//! wired together to run a single [`Command`].

use crate::audit::{AuditEntry, AuditLogReader};
use crate::command::{ApplyTarget, Command, DumpTarget, LogSince, Show, Target};
use crate::config::Config;
use crate::database::Database;
use crate::error::Error;
use crate::executor::{ApplyReport, Executor, MarkReport, Mode};
use crate::reconcile::{MigrationEntry, MigrationSet};
use crate::script::{MigrationScript, ScriptStore};
use chrono::{NaiveDateTime, Utc};

/// What a command produced, for the caller to present.
#[derive(Debug)]
pub enum Outcome {
    /// The new script. In a dry run it was not written.
    Created(MigrationScript),
    Listing {
        show: Show,
        entries: Vec<MigrationEntry>,
    },
    Marked(MarkReport),
    Unmarked(MarkReport),
    Applied(ApplyReport),
    /// `CREATE TABLE` statements, one per table.
    Dumped(Vec<String>),
    Log {
        entries: Vec<AuditEntry>,
        /// Where the next `log -` should start.
        checkpoint: NaiveDateTime,
    },
}

impl Outcome {
    /// Whether the command finished without any per-script failure.
    pub fn is_success(&self) -> bool {
        match self {
            Outcome::Marked(report) | Outcome::Unmarked(report) => report.is_success(),
            Outcome::Applied(report) => report.is_success(),
            _ => true,
        }
    }
}

pub struct Session<D: Database> {
    config: Config,
    db: D,
    scripts: ScriptStore,
    executor: Executor,
    /// False only in a dry run against a database without a tracking table.
    tracking_ready: bool,
}

impl<D: Database> Session<D> {
    /// Check the migrations directory and make sure the tracking table exists.
    /// A dry run never creates the table; if it is missing every script is
    /// treated as pending.
    pub fn open(config: Config, mut db: D, executor: Executor) -> Result<Self, Error> {
        let scripts = ScriptStore::open(config.migrations_dir())?;
        let tracking_ready = match executor.mode() {
            Mode::Live => {
                executor.store().ensure_schema(&mut db)?;
                true
            }
            Mode::DryRun => executor.store().exists(&mut db)?,
        };
        tracing::debug!(
            backend = db.backend(),
            dir = %scripts.dir().display(),
            mode = ?executor.mode(),
            "Session opened"
        );
        Ok(Self {
            config,
            db,
            scripts,
            executor,
            tracking_ready,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&mut self) -> &mut D {
        &mut self.db
    }

    pub fn into_database(self) -> D {
        self.db
    }

    /// Reconcile the scripts on disk with the tracking table.
    pub fn migrations(&mut self) -> Result<MigrationSet, Error> {
        let scripts = self.scripts.list()?;
        if !self.tracking_ready {
            return MigrationSet::diff(scripts, |_| Ok(None));
        }
        let store = self.executor.store();
        let db = &mut self.db;
        MigrationSet::diff(scripts, |filename| store.is_applied(&mut *db, filename))
    }

    pub fn run(&mut self, command: Command) -> Result<Outcome, Error> {
        let _span = tracing::info_span!("command", name = command.name()).entered();
        match command {
            Command::Create { name } => {
                let mode = self.config.sequence_mode();
                let script = match self.executor.mode() {
                    Mode::Live => self.scripts.create(&name, mode)?,
                    Mode::DryRun => self.scripts.plan(&name, mode, Utc::now())?,
                };
                Ok(Outcome::Created(script))
            }
            Command::Show(show) => {
                let set = self.migrations()?;
                let entries = set.select(show).into_iter().cloned().collect();
                Ok(Outcome::Listing { show, entries })
            }
            Command::Mark(target) => {
                let set = self.migrations()?;
                let report = match target {
                    Target::All => self.executor.mark_all(&mut self.db, &set),
                    Target::File(filename) => {
                        self.executor.mark_one(&mut self.db, &set, &filename)?;
                        MarkReport {
                            changed: vec![filename],
                            failures: vec![],
                        }
                    }
                };
                Ok(Outcome::Marked(report))
            }
            Command::Unmark(target) => {
                let set = self.migrations()?;
                let report = match target {
                    Target::All => self.executor.unmark_all(&mut self.db, &set),
                    Target::File(filename) => {
                        self.executor.unmark_one(&mut self.db, &set, &filename)?;
                        MarkReport {
                            changed: vec![filename],
                            failures: vec![],
                        }
                    }
                };
                Ok(Outcome::Unmarked(report))
            }
            Command::Apply(target) => {
                let set = self.migrations()?;
                let report = match target {
                    ApplyTarget::New => self.executor.apply_new(&mut self.db, &set),
                    ApplyTarget::File(filename) => {
                        self.executor.apply_one(&mut self.db, &set, &filename)?;
                        ApplyReport {
                            applied: vec![filename],
                            failure: None,
                        }
                    }
                };
                Ok(Outcome::Applied(report))
            }
            Command::Dump(target) => {
                let tables = match target {
                    DumpTarget::AllTables => {
                        let tracking = &self.config.database.table;
                        self.db
                            .list_tables()?
                            .into_iter()
                            .filter(|table| table != tracking)
                            .collect()
                    }
                    DumpTarget::Table(table) => vec![table],
                };
                let statements = tables
                    .iter()
                    .map(|table| self.db.show_create_table(table))
                    .collect::<Result<Vec<_>, Error>>()?;
                Ok(Outcome::Dumped(statements))
            }
            Command::Log(since) => {
                let checkpoint = match since {
                    LogSince::At(ts) => ts,
                    LogSince::Checkpoint => self.config.migrations.last_checkpoint.ok_or_else(|| {
                        Error::InvalidArgument(
                            "no checkpoint saved yet, give a timestamp instead of '-'".to_string(),
                        )
                    })?,
                };
                let reader =
                    AuditLogReader::new(&self.config.database.db, &self.config.database.table);
                let log = reader.since(&mut self.db, checkpoint)?;
                let next = log.next_checkpoint();
                Ok(Outcome::Log {
                    entries: log.collect(),
                    checkpoint: next,
                })
            }
        }
    }
}
