//! Configuration loaded from `turtle.yml`.

use crate::database::{parse_timestamp, TIMESTAMP_FORMAT};
use crate::error::Error;
use crate::script::SequenceMode;
use crate::state::{AppliedStateStore, TrackingTable};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Everything one invocation needs to know. Built once at startup and passed
/// explicitly; the only thing ever written back is the log checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Database connection settings
    pub database: DatabaseConfig,

    /// Migration file settings
    pub migrations: MigrationsConfig,

    /// Directory relative `migrations.dir` values are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub user: String,

    #[serde(default)]
    pub pass: String,

    /// Schema the migrations are applied to
    pub db: String,

    #[serde(default = "default_charset")]
    pub charset: String,

    /// Name of the tracking table
    #[serde(default = "default_table")]
    pub table: String,

    /// Storage engine of the tracking table
    #[serde(default = "default_engine")]
    pub engine: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationsConfig {
    /// Directory holding the migration scripts
    pub dir: PathBuf,

    #[serde(default)]
    pub inc_format: IncrementFormat,

    /// Digits in a sequential prefix
    #[serde(default = "default_inc_length")]
    pub inc_length: usize,

    /// Store each script's body in the tracking table
    #[serde(default = "default_true")]
    pub track_script: bool,

    /// Server time the last `log` scan ran up to
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "checkpoint_format"
    )]
    pub last_checkpoint: Option<NaiveDateTime>,
}

/// Numbering scheme for new scripts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncrementFormat {
    #[default]
    Sequential,
    Timestamp,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

fn default_table() -> String {
    "migrations".to_string()
}

fn default_engine() -> String {
    "InnoDB".to_string()
}

fn default_inc_length() -> usize {
    4
}

fn default_true() -> bool {
    true
}

mod checkpoint_format {
    use super::{parse_timestamp, TIMESTAMP_FORMAT};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => parse_timestamp(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Schema object names are interpolated into SQL, so only plain identifiers are accepted.
fn validate_identifier(field: &str, value: &str) -> Result<(), Error> {
    if value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err(Error::Config(format!(
            "{} must be a plain identifier, got '{}'",
            field, value
        )));
    }
    Ok(())
}

impl Config {
    /// Load and validate a configuration file. A relative `migrations.dir` is
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.is_file() {
            return Err(Error::Config(format!(
                "config file {} doesn't exist",
                path.display()
            )));
        }
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("error reading config file {}: {}", path.display(), e))
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, &base_dir).map_err(|e| match e {
            Error::Config(message) => {
                Error::Config(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// Parse and validate configuration text.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self, Error> {
        let mut config: Config =
            serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.base_dir = base_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.database.user.is_empty() {
            return Err(Error::Config("database.user must not be empty".to_string()));
        }
        validate_identifier("database.db", &self.database.db)?;
        validate_identifier("database.table", &self.database.table)?;
        validate_identifier("database.engine", &self.database.engine)?;
        validate_identifier("database.charset", &self.database.charset)?;
        if !(1..=20).contains(&self.migrations.inc_length) {
            return Err(Error::Config(format!(
                "migrations.inc_length must be between 1 and 20, got {}",
                self.migrations.inc_length
            )));
        }
        let dir = self.migrations_dir();
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "migrations directory {} doesn't exist",
                dir.display()
            )));
        }
        Ok(())
    }

    /// Write the configuration back to `path`.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let text = serde_yaml::to_string(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, text).map_err(|e| Error::io(path, e))?;
        tracing::debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// A copy of this configuration with a new log checkpoint.
    pub fn with_checkpoint(&self, checkpoint: NaiveDateTime) -> Self {
        let mut config = self.clone();
        config.migrations.last_checkpoint = Some(checkpoint);
        config
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.base_dir.join(&self.migrations.dir)
    }

    pub fn sequence_mode(&self) -> SequenceMode {
        match self.migrations.inc_format {
            IncrementFormat::Sequential => SequenceMode::Sequential {
                width: self.migrations.inc_length,
            },
            IncrementFormat::Timestamp => SequenceMode::Timestamp,
        }
    }

    pub fn tracking_table(&self) -> TrackingTable {
        TrackingTable::from(&self.database)
    }

    pub fn applied_state_store(&self) -> AppliedStateStore {
        AppliedStateStore::new(self.tracking_table())
            .with_script_tracking(self.migrations.track_script)
    }
}
