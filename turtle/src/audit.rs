//! Recovering schema-altering statements from the server's general query log.
//!
//! The log records every connection's traffic; a statement is attributed to a
//! schema by following each connection's `Connect`, `Init DB` and `USE` events.

use crate::database::{parse_timestamp, Database, LogEvent};
use crate::error::Error;
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Statement prefixes that change the schema.
const TRACKED_STATEMENTS: &[&str] = &[
    "CREATE TABLE",
    "ALTER TABLE",
    "DROP TABLE",
    "RENAME TABLE",
    "CREATE INDEX",
    "DROP INDEX",
    "CREATE TABLESPACE",
    "ALTER TABLESPACE",
    "DROP TABLESPACE",
    "CREATE VIEW",
    "ALTER VIEW",
    "DROP VIEW",
    "CREATE FUNCTION",
    "ALTER FUNCTION",
    "DROP FUNCTION",
    "CREATE PROCEDURE",
    "ALTER PROCEDURE",
    "DROP PROCEDURE",
    "CREATE EVENT",
    "ALTER EVENT",
    "DROP EVENT",
];

fn tracked_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let alternatives = TRACKED_STATEMENTS
            .iter()
            .map(|prefix| prefix.replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)^\s*(?:{})\b", alternatives))
            .expect("tracked statement pattern is valid")
    })
}

fn use_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*USE\s+`?([^`;\s]+)`?\s*;?\s*$").expect("use pattern is valid")
    })
}

pub fn is_tracked_statement(statement: &str) -> bool {
    tracked_pattern().is_match(statement)
}

/// Schema named by a `Connect` event argument, e.g. `app@10.0.0.4 on shop using TCP/IP`.
fn connect_schema(argument: &str) -> Option<&str> {
    let (_, rest) = argument.split_once(" on ")?;
    let schema = rest.split(" using ").next()?.trim();
    (!schema.is_empty()).then_some(schema)
}

/// A schema-altering statement found in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub statement: String,
    pub timestamp: NaiveDateTime,
    pub schema: String,
}

/// Finds statements run against one schema since a checkpoint.
#[derive(Debug, Clone)]
pub struct AuditLogReader {
    schema: String,
    tracking_table: String,
}

impl AuditLogReader {
    pub fn new(schema: impl Into<String>, tracking_table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            tracking_table: tracking_table.into(),
        }
    }

    /// Read the log after `checkpoint`. The server clock is sampled first so
    /// [`AuditLog::next_checkpoint`] never skips events written during the scan.
    pub fn since(
        &self,
        db: &mut dyn Database,
        checkpoint: NaiveDateTime,
    ) -> Result<AuditLog, Error> {
        let now = server_now(db)?;
        let events = db.read_query_log(checkpoint)?;
        tracing::debug!(
            checkpoint = %checkpoint,
            events = events.len(),
            "Read general query log"
        );
        Ok(AuditLog {
            events: events.into_iter(),
            contexts: HashMap::new(),
            schema: self.schema.clone(),
            tracking_table: self.tracking_table.clone(),
            checkpoint,
            next_checkpoint: now,
        })
    }
}

fn server_now(db: &mut dyn Database) -> Result<NaiveDateTime, Error> {
    let query = db.current_timestamp_query();
    let value = db
        .fetch_rows(query)?
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .flatten()
        .ok_or_else(|| Error::Generic("server returned no current timestamp".to_string()))?;
    parse_timestamp(&value)
}

/// Matching entries, oldest first, produced as the log is walked.
#[derive(Debug)]
pub struct AuditLog {
    events: std::vec::IntoIter<LogEvent>,
    /// Current schema of each server connection seen so far.
    contexts: HashMap<u64, String>,
    schema: String,
    tracking_table: String,
    checkpoint: NaiveDateTime,
    next_checkpoint: NaiveDateTime,
}

impl AuditLog {
    /// Server time at the start of the scan, to be stored for the next `-` run.
    pub fn next_checkpoint(&self) -> NaiveDateTime {
        self.next_checkpoint
    }

    fn mentions_tracking_table(&self, statement: &str) -> bool {
        statement
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
            .any(|word| word.eq_ignore_ascii_case(&self.tracking_table))
    }
}

impl Iterator for AuditLog {
    type Item = AuditEntry;

    fn next(&mut self) -> Option<AuditEntry> {
        while let Some(event) = self.events.next() {
            if event.event_time <= self.checkpoint {
                continue;
            }
            match event.command_type.as_str() {
                "Init DB" => {
                    self.contexts
                        .insert(event.thread_id, event.argument.trim().to_string());
                }
                "Connect" => match connect_schema(&event.argument) {
                    Some(schema) => {
                        self.contexts.insert(event.thread_id, schema.to_string());
                    }
                    None => {
                        self.contexts.remove(&event.thread_id);
                    }
                },
                "Query" => {
                    if let Some(captures) = use_pattern().captures(&event.argument) {
                        self.contexts.insert(event.thread_id, captures[1].to_string());
                        continue;
                    }
                    if self.contexts.get(&event.thread_id) != Some(&self.schema)
                        || !is_tracked_statement(&event.argument)
                        || self.mentions_tracking_table(&event.argument)
                    {
                        continue;
                    }
                    return Some(AuditEntry {
                        statement: event.argument.trim().to_string(),
                        timestamp: event.event_time,
                        schema: self.schema.clone(),
                    });
                }
                _ => {}
            }
        }
        None
    }
}
