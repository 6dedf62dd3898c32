use std::path::PathBuf;

/// Error type for the turtle crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Missing or unreadable configuration, or a missing migrations directory.
    #[error("configuration error: {0}")]
    Config(String),
    /// The database could not be reached.
    #[error("unable to connect to database: {0}")]
    Connection(String),
    /// A filename that is not part of the discovered migration set.
    #[error("{0} doesn't exist")]
    NotFound(String),
    #[error("{0} already applied")]
    AlreadyApplied(String),
    #[error("{0} not applied")]
    NotApplied(String),
    /// The tracking table already holds a row for this filename.
    #[error("{0} is already recorded in the tracking table")]
    Conflict(String),
    /// A statement inside a migration script failed; the script's transaction was rolled back.
    #[error("{filename} failed at statement {statement}: {message}")]
    Execution {
        filename: String,
        /// One-based index of the failing statement within the script.
        statement: usize,
        message: String,
    },
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown {family} command '{name}'")]
    UnknownCommand { family: &'static str, name: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A migration name that would not produce a discoverable filename.
    #[error("'{0}' does not produce a valid migration filename")]
    InvalidName(String),
    /// A unique key violation reported by the database.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[cfg(feature = "mysql")]
    #[error("{0}")]
    Mysql(String),
    #[error("{0}")]
    Generic(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// MySQL server error code for a duplicate entry on a unique key.
#[cfg(feature = "mysql")]
const ER_DUP_ENTRY: u16 = 1062;

#[cfg(feature = "mysql")]
impl From<mysql::Error> for Error {
    fn from(value: mysql::Error) -> Self {
        match value {
            mysql::Error::MySqlError(ref err) if err.code == ER_DUP_ENTRY => {
                Self::DuplicateKey(err.message.clone())
            }
            other => Self::Mysql(other.to_string()),
        }
    }
}
