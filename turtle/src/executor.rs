//! Applying, marking and unmarking scripts.

use crate::database::Database;
use crate::error::Error;
use crate::reconcile::MigrationSet;
use crate::script::MigrationScript;
use crate::state::AppliedStateStore;
use std::time::{Duration, Instant};

/// Whether side effects reach the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Live,
    /// Report what would happen; nothing is written to the database.
    DryRun,
}

/// How one script was handled by [`Executor::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    Applied(Duration),
    /// Dry run: the script was reported, not executed.
    Simulated,
}

/// A script that could not be applied, marked or unmarked.
#[derive(Debug)]
pub struct ScriptFailure {
    pub filename: String,
    pub error: Error,
}

/// Result of applying a batch of scripts.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Scripts applied (or, in a dry run, that would have been), in order.
    pub applied: Vec<String>,
    /// The script that stopped the batch.
    pub failure: Option<ScriptFailure>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of marking or unmarking scripts. Failures don't stop the batch.
#[derive(Debug, Default)]
pub struct MarkReport {
    pub changed: Vec<String>,
    pub failures: Vec<ScriptFailure>,
}

impl MarkReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs scripts against a connection and keeps the tracking table in step.
pub struct Executor {
    store: AppliedStateStore,
    mode: Mode,
    on_script_start: Option<Box<dyn Fn(&str) + Send + Sync>>,
    on_script_complete: Option<Box<dyn Fn(&str, Duration) + Send + Sync>>,
    on_script_error: Option<Box<dyn Fn(&str, &Error) + Send + Sync>>,
    on_dry_run: Option<Box<dyn Fn(&str, &str) + Send + Sync>>,
}

// Manual Debug impl since closures don't implement Debug
impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("store", &self.store)
            .field("mode", &self.mode)
            .field("on_script_start", &self.on_script_start.is_some())
            .field("on_script_complete", &self.on_script_complete.is_some())
            .field("on_script_error", &self.on_script_error.is_some())
            .field("on_dry_run", &self.on_dry_run.is_some())
            .finish()
    }
}

impl Executor {
    pub fn new(store: AppliedStateStore, mode: Mode) -> Self {
        Self {
            store,
            mode,
            on_script_start: None,
            on_script_complete: None,
            on_script_error: None,
            on_dry_run: None,
        }
    }

    /// Set a callback to be invoked when a script starts.
    /// The callback receives the script's filename.
    pub fn on_script_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_script_start = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a script has been applied and committed.
    /// The callback receives the filename and how long the script took.
    pub fn on_script_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, Duration) + Send + Sync + 'static,
    {
        self.on_script_complete = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a script fails.
    pub fn on_script_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &Error) + Send + Sync + 'static,
    {
        self.on_script_error = Some(Box::new(callback));
        self
    }

    /// Set a callback that receives the filename and the SQL a dry run would
    /// have sent.
    pub fn on_dry_run<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.on_dry_run = Some(Box::new(callback));
        self
    }

    pub fn store(&self) -> &AppliedStateStore {
        &self.store
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn dry_run(&self, filename: &str, sql: &str) {
        tracing::info!(filename = %filename, "Dry run, not executing");
        if let Some(ref callback) = self.on_dry_run {
            callback(filename, sql);
        }
    }

    /// Apply one script in its own transaction. The tracking row is written in
    /// the same transaction, so a failure leaves no record behind.
    pub fn apply(
        &self,
        db: &mut dyn Database,
        script: &MigrationScript,
    ) -> Result<ScriptOutcome, Error> {
        let filename = script.filename();
        let _span = tracing::info_span!("migration_apply", filename = %filename).entered();
        tracing::info!("Starting migration");

        if let Some(ref callback) = self.on_script_start {
            callback(filename);
        }

        let start = Instant::now();
        match self.run_script(db, script) {
            Ok(ScriptOutcome::Applied(_)) => {
                let duration = start.elapsed();
                tracing::info!(
                    duration_ms = duration.as_millis(),
                    "Migration completed successfully"
                );
                if let Some(ref callback) = self.on_script_complete {
                    callback(filename, duration);
                }
                Ok(ScriptOutcome::Applied(duration))
            }
            Ok(ScriptOutcome::Simulated) => Ok(ScriptOutcome::Simulated),
            Err(error) => {
                tracing::error!(error = %error, "Migration failed");
                if let Some(ref callback) = self.on_script_error {
                    callback(filename, &error);
                }
                Err(error)
            }
        }
    }

    fn run_script(
        &self,
        db: &mut dyn Database,
        script: &MigrationScript,
    ) -> Result<ScriptOutcome, Error> {
        let body = script.body()?;
        if self.mode == Mode::DryRun {
            self.dry_run(script.filename(), body);
            return Ok(ScriptOutcome::Simulated);
        }

        db.begin()?;
        if body.trim().is_empty() {
            tracing::debug!("Script is empty, recording only");
        } else if let Err(failure) = db.execute_script(body) {
            let error = Error::Execution {
                filename: script.filename().to_string(),
                statement: failure.statement + 1,
                message: failure.message,
            };
            rollback(db);
            return Err(error);
        }
        if let Err(error) = self.store.mark_applied(db, script) {
            rollback(db);
            return Err(error);
        }
        db.commit()?;
        Ok(ScriptOutcome::Applied(Duration::ZERO))
    }

    /// Apply every pending script in order, stopping at the first failure.
    /// Scripts applied before the failure stay applied.
    pub fn apply_new(&self, db: &mut dyn Database, set: &MigrationSet) -> ApplyReport {
        let mut report = ApplyReport::default();
        for entry in set.pending() {
            match self.apply(db, &entry.script) {
                Ok(_) => report.applied.push(entry.filename().to_string()),
                Err(error) => {
                    tracing::error!(
                        filename = %entry.filename(),
                        "Aborting, {} failed so no further migrations will be applied",
                        entry.filename()
                    );
                    report.failure = Some(ScriptFailure {
                        filename: entry.filename().to_string(),
                        error,
                    });
                    break;
                }
            }
        }
        report
    }

    /// Apply a single named script.
    pub fn apply_one(
        &self,
        db: &mut dyn Database,
        set: &MigrationSet,
        filename: &str,
    ) -> Result<ScriptOutcome, Error> {
        let entry = set
            .get(filename)
            .ok_or_else(|| Error::NotFound(filename.to_string()))?;
        if entry.is_applied() {
            return Err(Error::AlreadyApplied(filename.to_string()));
        }
        self.apply(db, &entry.script)
    }

    fn mark(&self, db: &mut dyn Database, script: &MigrationScript) -> Result<(), Error> {
        let _span = tracing::info_span!("migration_mark", filename = %script.filename()).entered();
        if self.mode == Mode::DryRun {
            let statement = self.store.insert_statement(db, script)?;
            self.dry_run(script.filename(), &statement);
            return Ok(());
        }
        self.store.mark_applied(db, script)?;
        tracing::info!(filename = %script.filename(), "Marked as applied");
        Ok(())
    }

    fn unmark(&self, db: &mut dyn Database, filename: &str) -> Result<(), Error> {
        let _span = tracing::info_span!("migration_unmark", filename = %filename).entered();
        if self.mode == Mode::DryRun {
            let statement = self.store.delete_statement(db, filename);
            self.dry_run(filename, &statement);
            return Ok(());
        }
        self.store.unmark_applied(db, filename)?;
        tracing::info!(filename = %filename, "Unmarked");
        Ok(())
    }

    /// Record a script as applied without running it.
    pub fn mark_one(
        &self,
        db: &mut dyn Database,
        set: &MigrationSet,
        filename: &str,
    ) -> Result<(), Error> {
        let entry = set
            .get(filename)
            .ok_or_else(|| Error::NotFound(filename.to_string()))?;
        if entry.is_applied() {
            return Err(Error::AlreadyApplied(filename.to_string()));
        }
        self.mark(db, &entry.script)
    }

    /// Mark every pending script, carrying on past failures.
    pub fn mark_all(&self, db: &mut dyn Database, set: &MigrationSet) -> MarkReport {
        let mut report = MarkReport::default();
        for entry in set.pending() {
            match self.mark(db, &entry.script) {
                Ok(()) => report.changed.push(entry.filename().to_string()),
                Err(error) => {
                    tracing::warn!(filename = %entry.filename(), error = %error, "Failed to mark");
                    report.failures.push(ScriptFailure {
                        filename: entry.filename().to_string(),
                        error,
                    });
                }
            }
        }
        report
    }

    /// Remove a script's applied record without running anything.
    pub fn unmark_one(
        &self,
        db: &mut dyn Database,
        set: &MigrationSet,
        filename: &str,
    ) -> Result<(), Error> {
        let entry = set
            .get(filename)
            .ok_or_else(|| Error::NotFound(filename.to_string()))?;
        if !entry.is_applied() {
            return Err(Error::NotApplied(filename.to_string()));
        }
        self.unmark(db, filename)
    }

    /// Unmark every applied script, carrying on past failures.
    pub fn unmark_all(&self, db: &mut dyn Database, set: &MigrationSet) -> MarkReport {
        let mut report = MarkReport::default();
        for entry in set.applied() {
            match self.unmark(db, entry.filename()) {
                Ok(()) => report.changed.push(entry.filename().to_string()),
                Err(error) => {
                    tracing::warn!(filename = %entry.filename(), error = %error, "Failed to unmark");
                    report.failures.push(ScriptFailure {
                        filename: entry.filename().to_string(),
                        error,
                    });
                }
            }
        }
        report
    }
}

fn rollback(db: &mut dyn Database) {
    tracing::info!("Rolling back migration");
    if let Err(error) = db.rollback() {
        tracing::error!(error = %error, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptStore;
    use crate::state::TrackingTable;
    use crate::test_sqlite::{get_test_db, migrations_dir};
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn executor(mode: Mode) -> Executor {
        Executor::new(AppliedStateStore::new(TrackingTable::new("migrations")), mode)
    }

    fn reconcile(executor: &Executor, db: &mut Connection, dir: &std::path::Path) -> MigrationSet {
        let scripts = ScriptStore::open(dir).unwrap().list().unwrap();
        MigrationSet::diff(scripts, |f| executor.store().is_applied(&mut *db, f)).unwrap()
    }

    fn table_names(db: &mut Connection) -> Vec<String> {
        db.list_tables().unwrap()
    }

    #[test]
    fn apply_new_runs_pending_in_order_and_records_them() {
        let dir = migrations_dir(&[
            ("0002.add-orders.sql", "CREATE TABLE orders (id INTEGER, user_id INTEGER);"),
            ("0001.add-users.sql", "CREATE TABLE users (id INTEGER);\nINSERT INTO users VALUES (1);"),
        ]);
        let started = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&started);
        let executor = executor(Mode::Live)
            .on_script_start(move |filename| sink.lock().unwrap().push(filename.to_string()));
        let mut db = get_test_db();
        executor.store().ensure_schema(&mut db).unwrap();

        let set = reconcile(&executor, &mut db, dir.path());
        let report = executor.apply_new(&mut db, &set);

        assert!(report.is_success());
        assert_eq!(report.applied, vec!["0001.add-users.sql", "0002.add-orders.sql"]);
        assert_eq!(*started.lock().unwrap(), report.applied);
        assert_eq!(table_names(&mut db), vec!["migrations", "orders", "users"]);

        let set = reconcile(&executor, &mut db, dir.path());
        assert_eq!(set.pending().count(), 0);
        assert!(executor.apply_new(&mut db, &set).applied.is_empty());
    }

    #[test]
    fn failure_rolls_back_and_halts_the_batch() {
        let dir = migrations_dir(&[
            ("0001.first.sql", "CREATE TABLE first (id INTEGER);"),
            (
                "0002.second.sql",
                "CREATE TABLE second (id INTEGER);\nINSERT INTO nowhere VALUES (1);",
            ),
            ("0003.third.sql", "CREATE TABLE third (id INTEGER);"),
        ]);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let executor = executor(Mode::Live)
            .on_script_error(move |filename, _| sink.lock().unwrap().push(filename.to_string()));
        let mut db = get_test_db();
        executor.store().ensure_schema(&mut db).unwrap();

        let set = reconcile(&executor, &mut db, dir.path());
        let report = executor.apply_new(&mut db, &set);

        assert_eq!(report.applied, vec!["0001.first.sql"]);
        let failure = report.failure.unwrap();
        assert_eq!(failure.filename, "0002.second.sql");
        assert!(matches!(
            failure.error,
            Error::Execution { ref filename, statement: 2, .. } if filename == "0002.second.sql"
        ));
        assert_eq!(*errors.lock().unwrap(), vec!["0002.second.sql"]);
        assert_eq!(table_names(&mut db), vec!["first", "migrations"]);

        let set = reconcile(&executor, &mut db, dir.path());
        assert!(set.get("0001.first.sql").unwrap().is_applied());
        assert!(!set.get("0002.second.sql").unwrap().is_applied());
        assert!(!set.get("0003.third.sql").unwrap().is_applied());
    }

    #[test]
    fn apply_one_checks_state() {
        let dir = migrations_dir(&[("0001.first.sql", "CREATE TABLE first (id INTEGER);")]);
        let executor = executor(Mode::Live);
        let mut db = get_test_db();
        executor.store().ensure_schema(&mut db).unwrap();

        let set = reconcile(&executor, &mut db, dir.path());
        assert!(matches!(
            executor.apply_one(&mut db, &set, "0009.missing.sql"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            executor.apply_one(&mut db, &set, "0001.first.sql"),
            Ok(ScriptOutcome::Applied(_))
        ));

        let set = reconcile(&executor, &mut db, dir.path());
        assert!(matches!(
            executor.apply_one(&mut db, &set, "0001.first.sql"),
            Err(Error::AlreadyApplied(_))
        ));
    }

    #[test]
    fn empty_script_is_recorded() {
        let dir = migrations_dir(&[("0001.placeholder.sql", "  \n")]);
        let executor = executor(Mode::Live);
        let mut db = get_test_db();
        executor.store().ensure_schema(&mut db).unwrap();

        let set = reconcile(&executor, &mut db, dir.path());
        assert!(executor.apply_new(&mut db, &set).is_success());
        let set = reconcile(&executor, &mut db, dir.path());
        assert!(set.get("0001.placeholder.sql").unwrap().is_applied());
    }

    #[test]
    fn dry_run_touches_nothing() {
        let dir = migrations_dir(&[
            ("0001.first.sql", "CREATE TABLE first (id INTEGER);"),
            ("0002.second.sql", "CREATE TABLE second (id INTEGER);"),
        ]);
        let mut db = get_test_db();
        executor(Mode::Live).store().ensure_schema(&mut db).unwrap();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let executor = executor(Mode::DryRun).on_dry_run(move |filename, sql| {
            sink.lock().unwrap().push((filename.to_string(), sql.to_string()))
        });

        let set = reconcile(&executor, &mut db, dir.path());
        let report = executor.apply_new(&mut db, &set);
        assert_eq!(report.applied, vec!["0001.first.sql", "0002.second.sql"]);
        assert_eq!(
            reported.lock().unwrap()[0],
            (
                "0001.first.sql".to_string(),
                "CREATE TABLE first (id INTEGER);".to_string()
            )
        );

        let marked = executor.mark_all(&mut db, &set);
        assert_eq!(marked.changed.len(), 2);
        assert!(reported.lock().unwrap()[2].1.starts_with("INSERT INTO `migrations`"));

        assert_eq!(table_names(&mut db), vec!["migrations"]);
        let set = reconcile(&executor, &mut db, dir.path());
        assert_eq!(set.pending().count(), 2);
    }

    #[test]
    fn dry_run_never_sends_the_script_body() {
        let dir = migrations_dir(&[
            ("0001.first.sql", "CREATE TABLE first (id INTEGER);"),
            ("0002.broken.sql", "THIS IS NOT SQL; DROP TABLE migrations;"),
        ]);
        let mut db = get_test_db();
        let live = executor(Mode::Live);
        live.store().ensure_schema(&mut db).unwrap();
        let set = reconcile(&live, &mut db, dir.path());
        live.apply_one(&mut db, &set, "0001.first.sql").unwrap();
        let tracked = |db: &mut Connection| {
            db.fetch_rows("SELECT filename, date_applied FROM migrations ORDER BY filename")
                .unwrap()
        };
        let before = tracked(&mut db);

        let dry = executor(Mode::DryRun);
        let set = reconcile(&dry, &mut db, dir.path());
        let report = dry.apply_new(&mut db, &set);
        assert!(report.is_success());
        assert_eq!(report.applied, vec!["0002.broken.sql"]);
        dry.apply_one(&mut db, &set, "0002.broken.sql").unwrap();

        assert_eq!(table_names(&mut db), vec!["first", "migrations"]);
        assert_eq!(tracked(&mut db), before);
        let set = reconcile(&dry, &mut db, dir.path());
        assert_eq!(set.pending().count(), 1);
    }

    #[test]
    fn mark_and_unmark_single_scripts() {
        let dir = migrations_dir(&[("0001.first.sql", "CREATE TABLE first (id INTEGER);")]);
        let executor = executor(Mode::Live);
        let mut db = get_test_db();
        executor.store().ensure_schema(&mut db).unwrap();

        let set = reconcile(&executor, &mut db, dir.path());
        assert!(matches!(
            executor.unmark_one(&mut db, &set, "0001.first.sql"),
            Err(Error::NotApplied(_))
        ));
        executor.mark_one(&mut db, &set, "0001.first.sql").unwrap();
        // marking records without executing
        assert_eq!(table_names(&mut db), vec!["migrations"]);

        let set = reconcile(&executor, &mut db, dir.path());
        assert!(matches!(
            executor.mark_one(&mut db, &set, "0001.first.sql"),
            Err(Error::AlreadyApplied(_))
        ));
        executor.unmark_one(&mut db, &set, "0001.first.sql").unwrap();

        let set = reconcile(&executor, &mut db, dir.path());
        assert!(!set.get("0001.first.sql").unwrap().is_applied());
    }

    #[test]
    fn mark_all_continues_past_failures() {
        let dir = migrations_dir(&[
            ("0001.first.sql", "SELECT 1;"),
            ("0002.second.sql", "SELECT 2;"),
            ("0003.third.sql", "SELECT 3;"),
        ]);
        let executor = executor(Mode::Live);
        let mut db = get_test_db();
        executor.store().ensure_schema(&mut db).unwrap();
        let set = reconcile(&executor, &mut db, dir.path());

        // another process records the second script after we reconciled
        executor
            .store()
            .mark_applied(&mut db, &set.get("0002.second.sql").unwrap().script)
            .unwrap();

        let report = executor.mark_all(&mut db, &set);
        assert_eq!(report.changed, vec!["0001.first.sql", "0003.third.sql"]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, Error::Conflict(_)));

        let set = reconcile(&executor, &mut db, dir.path());
        let report = executor.unmark_all(&mut db, &set);
        assert!(report.is_success());
        assert_eq!(report.changed.len(), 3);
        let set = reconcile(&executor, &mut db, dir.path());
        assert_eq!(set.applied().count(), 0);
    }
}
