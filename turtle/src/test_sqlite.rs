//! In-memory SQLite test infrastructure.
//!
//! SQLite stands in for the server in unit tests: it runs multi-statement
//! scripts, rolls back DDL inside transactions, and raises unique-key
//! violations, which is everything the engine relies on. It has no general
//! query log, so `read_query_log` reads a `general_log` table of the same shape
//! when a test creates one.

use std::fs;
use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, ErrorCode};
use tempfile::TempDir;

use crate::config::Config;
use crate::database::{
    parse_timestamp, quote_identifier, BatchError, Database, LogEvent, TIMESTAMP_FORMAT,
};
use crate::error::Error;
use crate::state::TrackingTable;
use chrono::NaiveDateTime;

fn sqlite_error(err: rusqlite::Error) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, ref message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Error::DuplicateKey(message.clone().unwrap_or_else(|| failure.to_string()))
        }
        other => Error::Generic(other.to_string()),
    }
}

impl Database for Connection {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn execute_statement(&mut self, statement: &str) -> Result<u64, Error> {
        let changed = Connection::execute(self, statement, []).map_err(sqlite_error)?;
        Ok(changed as u64)
    }

    fn execute_script(&mut self, script: &str) -> Result<usize, BatchError> {
        let mut batch = Batch::new(self, script);
        let mut statement = 0;
        loop {
            let Some(mut stmt) = batch.next().map_err(|e| BatchError::new(statement, e))? else {
                break;
            };
            let mut rows = stmt.raw_query();
            while rows
                .next()
                .map_err(|e| BatchError::new(statement, e))?
                .is_some()
            {}
            statement += 1;
        }
        Ok(statement)
    }

    fn fetch_rows(&mut self, query: &str) -> Result<Vec<Vec<Option<String>>>, Error> {
        let mut stmt = self.prepare(query).map_err(sqlite_error)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([]).map_err(sqlite_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(sqlite_error)? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(match row.get_ref(i).map_err(sqlite_error)? {
                    ValueRef::Null => None,
                    ValueRef::Integer(v) => Some(v.to_string()),
                    ValueRef::Real(v) => Some(v.to_string()),
                    ValueRef::Text(v) | ValueRef::Blob(v) => {
                        Some(String::from_utf8_lossy(v).into_owned())
                    }
                });
            }
            out.push(values);
        }
        Ok(out)
    }

    fn quote(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    fn current_timestamp_query(&self) -> &'static str {
        "SELECT strftime('%Y-%m-%d %H:%M:%f', 'now')"
    }

    fn has_table(&mut self, table: &str) -> Result<bool, Error> {
        let rows = self.fetch_rows(&format!(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = {}",
            self.quote(table)
        ))?;
        Ok(rows
            .first()
            .and_then(|row| row.first().cloned().flatten())
            .is_some_and(|count| count != "0"))
    }

    fn tracking_table_ddl(&self, table: &TrackingTable) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                filename VARCHAR(250) NOT NULL PRIMARY KEY,
                script TEXT NULL,
                date_applied TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            quote_identifier(&table.name)
        )
    }

    fn read_query_log(&mut self, after: NaiveDateTime) -> Result<Vec<LogEvent>, Error> {
        if !self.has_table("general_log")? {
            return Ok(vec![]);
        }
        let rows = self.fetch_rows(&format!(
            "SELECT event_time, thread_id, command_type, argument FROM general_log \
             WHERE command_type IN ('Query', 'Init DB', 'Connect') AND event_time > {} \
             ORDER BY event_time ASC",
            self.quote(&after.format(TIMESTAMP_FORMAT).to_string())
        ))?;
        rows.into_iter()
            .map(|row| -> Result<LogEvent, Error> {
                let text = |i: usize| row.get(i).cloned().flatten().unwrap_or_default();
                Ok(LogEvent {
                    event_time: parse_timestamp(&text(0))?,
                    thread_id: text(1).parse().unwrap_or_default(),
                    command_type: text(2),
                    argument: text(3),
                })
            })
            .collect()
    }

    fn list_tables(&mut self) -> Result<Vec<String>, Error> {
        let rows = self.fetch_rows(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }

    fn show_create_table(&mut self, table: &str) -> Result<String, Error> {
        let rows = self.fetch_rows(&format!(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = {}",
            self.quote(table)
        ))?;
        rows.into_iter()
            .next()
            .and_then(|row| row.into_iter().next().flatten())
            .ok_or_else(|| Error::NotFound(table.to_string()))
    }
}

/// A fresh in-memory database.
pub fn get_test_db() -> Connection {
    Connection::open_in_memory().expect("failed to open in-memory sqlite database")
}

/// A temporary migrations directory populated with `(filename, body)` pairs.
pub fn migrations_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    for (name, body) in files {
        fs::write(dir.path().join(name), body).expect("failed to write migration file");
    }
    dir
}

/// A configuration pointing at `dir`, tracking applied scripts in `migrations`.
pub fn test_config(dir: &Path) -> Config {
    let yaml = format!(
        "database:\n  user: tester\n  db: shop\nmigrations:\n  dir: {}\n",
        dir.display()
    );
    Config::parse(&yaml, Path::new(".")).expect("test config is valid")
}

/// Create the `general_log` table read by `read_query_log`.
pub fn create_general_log(db: &mut Connection) {
    db.execute_batch(
        "CREATE TABLE general_log (
            event_time TEXT NOT NULL,
            thread_id INTEGER NOT NULL,
            command_type TEXT NOT NULL,
            argument TEXT NOT NULL
        )",
    )
    .expect("failed to create general_log");
}

/// Append one row to the `general_log` table.
pub fn log_event(db: &mut Connection, event_time: &str, thread_id: u64, command_type: &str, argument: &str) {
    db.execute(
        "INSERT INTO general_log (event_time, thread_id, command_type, argument) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![event_time, thread_id as i64, command_type, argument],
    )
    .expect("failed to insert general_log row");
}
