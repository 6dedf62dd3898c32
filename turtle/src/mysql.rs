//! MySQL backend.
//!
//! Note that MySQL commits implicitly around DDL statements, so a failing
//! script that already ran `CREATE` or `ALTER` statements only rolls back the
//! DML issued since the last implicit commit.

use crate::config::DatabaseConfig;
use crate::database::{parse_timestamp, quote_identifier, BatchError, Database, LogEvent, TIMESTAMP_FORMAT};
use crate::error::Error;
use crate::state::TrackingTable;
use chrono::NaiveDateTime;
use mysql::prelude::*;
use mysql::{Conn, OptsBuilder, Row, Value};

/// Open a connection for one invocation.
pub fn connect(config: &DatabaseConfig) -> Result<Conn, Error> {
    let opts = OptsBuilder::new()
        .ip_or_hostname(Some(config.host.clone()))
        .tcp_port(config.port)
        .user(Some(config.user.clone()))
        .pass(Some(config.pass.clone()))
        .db_name(Some(config.db.clone()))
        .init(vec![
            format!("SET NAMES {}", config.charset),
            // Timestamps read and compared by `log` are UTC.
            "SET time_zone = '+00:00'".to_string(),
        ]);
    let conn = Conn::new(opts).map_err(|e| Error::Connection(e.to_string()))?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        db = %config.db,
        "Connected to database"
    );
    Ok(conn)
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        Value::Date(year, month, day, hour, minute, second, micros) => Some(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            year, month, day, hour, minute, second, micros
        )),
        Value::Time(negative, days, hours, minutes, seconds, micros) => Some(format!(
            "{}{:02}:{:02}:{:02}.{:06}",
            if *negative { "-" } else { "" },
            u32::from(*hours) + days * 24,
            minutes,
            seconds,
            micros
        )),
    }
}

fn row_to_text(row: &Row) -> Vec<Option<String>> {
    (0..row.len())
        .map(|i| row.as_ref(i).and_then(value_to_text))
        .collect()
}

impl Database for Conn {
    fn backend(&self) -> &'static str {
        "mysql"
    }

    fn execute_statement(&mut self, statement: &str) -> Result<u64, Error> {
        Queryable::query_drop(self, statement)?;
        Ok(self.affected_rows())
    }

    fn execute_script(&mut self, script: &str) -> Result<usize, BatchError> {
        let mut result =
            Queryable::query_iter(self, script).map_err(|e| BatchError::new(0, e))?;
        // every result set has to be consumed before the connection is reusable
        let mut statement = 0;
        while let Some(set) = result.iter() {
            for row in set {
                row.map_err(|e| BatchError::new(statement, e))?;
            }
            statement += 1;
        }
        Ok(statement)
    }

    fn fetch_rows(&mut self, query: &str) -> Result<Vec<Vec<Option<String>>>, Error> {
        let rows: Vec<Row> = Queryable::query(self, query)?;
        Ok(rows.iter().map(row_to_text).collect())
    }

    fn quote(&self, value: &str) -> String {
        Value::from(value).as_sql(false)
    }

    fn current_timestamp_query(&self) -> &'static str {
        "SELECT CURRENT_TIMESTAMP(6)"
    }

    fn has_table(&mut self, table: &str) -> Result<bool, Error> {
        let query = format!(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' AND table_name = {}",
            self.quote(table)
        );
        let count: Option<u64> = Queryable::query_first(self, query)?;
        Ok(count.unwrap_or(0) > 0)
    }

    fn tracking_table_ddl(&self, table: &TrackingTable) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                `filename` VARCHAR(250) NOT NULL,
                `script` LONGTEXT NULL,
                `date_applied` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                PRIMARY KEY (`filename`)
            ) ENGINE={} DEFAULT CHARSET={}",
            quote_identifier(&table.name),
            table.engine,
            table.charset
        )
    }

    fn read_query_log(&mut self, after: NaiveDateTime) -> Result<Vec<LogEvent>, Error> {
        let query = format!(
            "SELECT event_time, thread_id, command_type, argument FROM mysql.general_log \
             WHERE command_type IN ('Query', 'Init DB', 'Connect') AND event_time > {} \
             ORDER BY event_time ASC",
            self.quote(&after.format(TIMESTAMP_FORMAT).to_string())
        );
        self.fetch_rows(&query)?
            .into_iter()
            .map(|mut row| -> Result<LogEvent, Error> {
                row.resize(4, None);
                let mut take = |i: usize| row[i].take().unwrap_or_default();
                let event_time = parse_timestamp(&take(0))?;
                let thread_id = take(1).parse().unwrap_or_default();
                Ok(LogEvent {
                    event_time,
                    thread_id,
                    command_type: take(2),
                    argument: take(3),
                })
            })
            .collect()
    }

    fn list_tables(&mut self) -> Result<Vec<String>, Error> {
        let tables: Vec<String> = Queryable::query(
            self,
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )?;
        Ok(tables)
    }

    fn show_create_table(&mut self, table: &str) -> Result<String, Error> {
        if !self.has_table(table)? {
            return Err(Error::NotFound(table.to_string()));
        }
        // Second column holds the statement; the row shape differs for views.
        self.fetch_rows(&format!("SHOW CREATE TABLE {}", quote_identifier(table)))?
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().nth(1).flatten())
            .ok_or_else(|| Error::NotFound(table.to_string()))
    }
}
