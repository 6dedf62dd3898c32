//! The tracking table: which scripts have been applied, and when.

use crate::config::DatabaseConfig;
use crate::database::{parse_timestamp, quote_identifier, Database};
use crate::error::Error;
use crate::script::MigrationScript;
use chrono::NaiveDateTime;

/// Name and storage options of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingTable {
    pub name: String,
    pub engine: String,
    pub charset: String,
}

impl TrackingTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: "InnoDB".to_string(),
            charset: "utf8mb4".to_string(),
        }
    }
}

impl From<&DatabaseConfig> for TrackingTable {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            name: config.table.clone(),
            engine: config.engine.clone(),
            charset: config.charset.clone(),
        }
    }
}

/// A row of the tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRecord {
    pub filename: String,
    pub applied_at: NaiveDateTime,
    /// Script body captured when the row was written, if script tracking was on.
    pub script: Option<String>,
}

/// Reads and writes the tracking table. Every write of an applied record goes
/// through [`AppliedStateStore::mark_applied`].
#[derive(Debug, Clone)]
pub struct AppliedStateStore {
    table: TrackingTable,
    track_script: bool,
}

impl AppliedStateStore {
    pub fn new(table: TrackingTable) -> Self {
        Self {
            table,
            track_script: true,
        }
    }

    /// Whether the script body is stored alongside each applied record. Defaults to `true`.
    pub fn with_script_tracking(mut self, enabled: bool) -> Self {
        self.track_script = enabled;
        self
    }

    pub fn table(&self) -> &TrackingTable {
        &self.table
    }

    pub fn exists(&self, db: &mut dyn Database) -> Result<bool, Error> {
        db.has_table(&self.table.name)
    }

    /// Create the tracking table if it is absent. Returns whether it already existed.
    pub fn ensure_schema(&self, db: &mut dyn Database) -> Result<bool, Error> {
        let existed = self.exists(db)?;
        if !existed {
            tracing::info!(table = %self.table.name, "Creating tracking table");
            let ddl = db.tracking_table_ddl(&self.table);
            db.execute_statement(&ddl)?;
        }
        Ok(existed)
    }

    /// When `filename` was applied, or `None` if it has no record.
    pub fn is_applied(
        &self,
        db: &mut dyn Database,
        filename: &str,
    ) -> Result<Option<NaiveDateTime>, Error> {
        let query = format!(
            "SELECT date_applied FROM {} WHERE filename = {}",
            quote_identifier(&self.table.name),
            db.quote(filename)
        );
        match db
            .fetch_rows(&query)?
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .flatten()
        {
            Some(value) => Ok(Some(parse_timestamp(&value)?)),
            None => Ok(None),
        }
    }

    pub fn record(
        &self,
        db: &mut dyn Database,
        filename: &str,
    ) -> Result<Option<AppliedRecord>, Error> {
        let query = format!(
            "SELECT filename, date_applied, script FROM {} WHERE filename = {}",
            quote_identifier(&self.table.name),
            db.quote(filename)
        );
        let Some(mut row) = db.fetch_rows(&query)?.into_iter().next() else {
            return Ok(None);
        };
        row.resize(3, None);
        let script = row.pop().flatten();
        let applied_at = row.pop().flatten().unwrap_or_default();
        let filename = row.pop().flatten().unwrap_or_default();
        Ok(Some(AppliedRecord {
            filename,
            applied_at: parse_timestamp(&applied_at)?,
            script,
        }))
    }

    /// The `INSERT` that records `script` as applied at the server's current time.
    pub fn insert_statement(
        &self,
        db: &dyn Database,
        script: &MigrationScript,
    ) -> Result<String, Error> {
        let body = if self.track_script {
            db.quote(script.body()?)
        } else {
            "NULL".to_string()
        };
        Ok(format!(
            "INSERT INTO {} (filename, script, date_applied) VALUES ({}, {}, CURRENT_TIMESTAMP)",
            quote_identifier(&self.table.name),
            db.quote(script.filename()),
            body
        ))
    }

    pub fn delete_statement(&self, db: &dyn Database, filename: &str) -> String {
        format!(
            "DELETE FROM {} WHERE filename = {}",
            quote_identifier(&self.table.name),
            db.quote(filename)
        )
    }

    /// Record `script` as applied. A second record for the same filename is a
    /// [`Error::Conflict`].
    pub fn mark_applied(&self, db: &mut dyn Database, script: &MigrationScript) -> Result<(), Error> {
        let statement = self.insert_statement(db, script)?;
        match db.execute_statement(&statement) {
            Ok(_) => {
                tracing::debug!(filename = %script.filename(), "Recorded as applied");
                Ok(())
            }
            Err(Error::DuplicateKey(_)) => Err(Error::Conflict(script.filename().to_string())),
            Err(e) => Err(e),
        }
    }

    pub fn unmark_applied(&self, db: &mut dyn Database, filename: &str) -> Result<(), Error> {
        let statement = self.delete_statement(db, filename);
        if db.execute_statement(&statement)? == 0 {
            return Err(Error::NotApplied(filename.to_string()));
        }
        tracing::debug!(filename = %filename, "Removed applied record");
        Ok(())
    }
}
