//! The connection seam between the migration engine and the database server.
//!
//! Everything the engine needs from a live connection goes through [`Database`]:
//! single statements, multi-statement scripts, transaction control, literal
//! quoting, and the few pieces of server introspection used by `dump` and `log`.

use crate::error::Error;
use crate::state::TrackingTable;
use chrono::NaiveDateTime;

/// Formats the `YYYY-MM-DD HH:MM:SS[.ffffff]` timestamps exchanged with the
/// server. Whole seconds are written without a fraction.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parse a server timestamp, tolerating a fractional-seconds suffix and an ISO `T` separator.
pub(crate) fn parse_timestamp(value: &str) -> Result<NaiveDateTime, Error> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|e| Error::Generic(format!("Failed to parse timestamp '{}': {}", value, e)))
}

/// Quote an identifier with backticks, which both MySQL and SQLite accept.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Failure of one statement inside a multi-statement script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// Zero-based index of the statement that failed.
    pub statement: usize,
    pub message: String,
}

impl BatchError {
    pub fn new(statement: usize, message: impl ToString) -> Self {
        Self {
            statement,
            message: message.to_string(),
        }
    }
}

/// One row of the server's general query log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub event_time: NaiveDateTime,
    /// Server connection the event was issued on.
    pub thread_id: u64,
    /// `Query`, `Init DB`, `Connect`, ...
    pub command_type: String,
    pub argument: String,
}

/// The live connection used for one invocation.
///
/// Implementations must drain every result set produced by a script before
/// returning from [`Database::execute_script`], so the connection is usable for
/// the next statement.
pub trait Database {
    /// Backend identifier for logging.
    fn backend(&self) -> &'static str;

    /// Execute a single statement, returning the number of affected rows.
    fn execute_statement(&mut self, statement: &str) -> Result<u64, Error>;

    /// Execute a (possibly multi-statement) script verbatim, consuming all
    /// result sets. Returns the number of statements executed, or the index of
    /// the first one that failed.
    fn execute_script(&mut self, script: &str) -> Result<usize, BatchError>;

    /// Run a query and return its rows as text, `None` for SQL NULL.
    fn fetch_rows(&mut self, query: &str) -> Result<Vec<Vec<Option<String>>>, Error>;

    fn begin(&mut self) -> Result<(), Error> {
        self.execute_statement("BEGIN").map(|_| ())
    }

    fn commit(&mut self) -> Result<(), Error> {
        self.execute_statement("COMMIT").map(|_| ())
    }

    fn rollback(&mut self) -> Result<(), Error> {
        self.execute_statement("ROLLBACK").map(|_| ())
    }

    /// Render `value` as a quoted, escaped string literal.
    fn quote(&self, value: &str) -> String;

    /// Query for the server's current time, as precise as its query log.
    fn current_timestamp_query(&self) -> &'static str {
        "SELECT CURRENT_TIMESTAMP"
    }

    /// Whether a table with this name exists in the current schema.
    fn has_table(&mut self, table: &str) -> Result<bool, Error>;

    /// `CREATE TABLE IF NOT EXISTS` statement for the tracking table.
    fn tracking_table_ddl(&self, table: &TrackingTable) -> String;

    /// General query log rows with `event_time` strictly after `after`, oldest first.
    fn read_query_log(&mut self, after: NaiveDateTime) -> Result<Vec<LogEvent>, Error>;

    /// Tables of the current schema, in name order.
    fn list_tables(&mut self) -> Result<Vec<String>, Error>;

    /// The server's own `CREATE TABLE` statement for `table`.
    fn show_create_table(&mut self, table: &str) -> Result<String, Error>;
}

impl<D: Database + ?Sized> Database for Box<D> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    fn execute_statement(&mut self, statement: &str) -> Result<u64, Error> {
        (**self).execute_statement(statement)
    }

    fn execute_script(&mut self, script: &str) -> Result<usize, BatchError> {
        (**self).execute_script(script)
    }

    fn fetch_rows(&mut self, query: &str) -> Result<Vec<Vec<Option<String>>>, Error> {
        (**self).fetch_rows(query)
    }

    fn begin(&mut self) -> Result<(), Error> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<(), Error> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<(), Error> {
        (**self).rollback()
    }

    fn quote(&self, value: &str) -> String {
        (**self).quote(value)
    }

    fn current_timestamp_query(&self) -> &'static str {
        (**self).current_timestamp_query()
    }

    fn has_table(&mut self, table: &str) -> Result<bool, Error> {
        (**self).has_table(table)
    }

    fn tracking_table_ddl(&self, table: &TrackingTable) -> String {
        (**self).tracking_table_ddl(table)
    }

    fn read_query_log(&mut self, after: NaiveDateTime) -> Result<Vec<LogEvent>, Error> {
        (**self).read_query_log(after)
    }

    fn list_tables(&mut self) -> Result<Vec<String>, Error> {
        (**self).list_tables()
    }

    fn show_create_table(&mut self, table: &str) -> Result<String, Error> {
        (**self).show_create_table(table)
    }
}

/// Verbose mode: hands every statement to a callback before it reaches the
/// wrapped connection.
pub struct Echo<D> {
    inner: D,
    echo: Box<dyn FnMut(&str)>,
}

impl<D: Database> Echo<D> {
    pub fn new<F>(inner: D, echo: F) -> Self
    where
        F: FnMut(&str) + 'static,
    {
        Self {
            inner,
            echo: Box::new(echo),
        }
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

// Manual Debug impl since closures don't implement Debug
impl<D: std::fmt::Debug> std::fmt::Debug for Echo<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Echo").field("inner", &self.inner).finish()
    }
}

impl<D: Database> Database for Echo<D> {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    fn execute_statement(&mut self, statement: &str) -> Result<u64, Error> {
        (self.echo)(statement);
        self.inner.execute_statement(statement)
    }

    fn execute_script(&mut self, script: &str) -> Result<usize, BatchError> {
        (self.echo)(script);
        self.inner.execute_script(script)
    }

    fn fetch_rows(&mut self, query: &str) -> Result<Vec<Vec<Option<String>>>, Error> {
        (self.echo)(query);
        self.inner.fetch_rows(query)
    }

    fn begin(&mut self) -> Result<(), Error> {
        (self.echo)("BEGIN");
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), Error> {
        (self.echo)("COMMIT");
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), Error> {
        (self.echo)("ROLLBACK");
        self.inner.rollback()
    }

    fn quote(&self, value: &str) -> String {
        self.inner.quote(value)
    }

    fn current_timestamp_query(&self) -> &'static str {
        self.inner.current_timestamp_query()
    }

    fn has_table(&mut self, table: &str) -> Result<bool, Error> {
        self.inner.has_table(table)
    }

    fn tracking_table_ddl(&self, table: &TrackingTable) -> String {
        self.inner.tracking_table_ddl(table)
    }

    fn read_query_log(&mut self, after: NaiveDateTime) -> Result<Vec<LogEvent>, Error> {
        self.inner.read_query_log(after)
    }

    fn list_tables(&mut self) -> Result<Vec<String>, Error> {
        self.inner.list_tables()
    }

    fn show_create_table(&mut self, table: &str) -> Result<String, Error> {
        self.inner.show_create_table(table)
    }
}
