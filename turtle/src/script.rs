//! Migration scripts on disk.
//!
//! A migration is a file named `<sequence>.<slug>.sql` in the migrations
//! directory. The numeric sequence orders scripts; files that don't follow the
//! pattern are ignored.

use crate::error::Error;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::cell::OnceCell;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i-u)^([0-9]+)\.([a-z][a-z0-9._-]*[a-z0-9])\.sql$")
            .expect("migration filename pattern is valid")
    })
}

/// How `create` numbers a new script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceMode {
    /// One more than the highest existing sequence, zero-padded to `width` digits.
    Sequential { width: usize },
    /// Seconds since the Unix epoch.
    Timestamp,
}

/// One discovered migration file. The body is read on first use.
#[derive(Debug, Clone)]
pub struct MigrationScript {
    sequence: u64,
    slug: String,
    filename: String,
    path: PathBuf,
    body: OnceCell<String>,
}

impl MigrationScript {
    /// Returns `None` when `filename` is not a migration filename.
    pub(crate) fn from_filename(dir: &Path, filename: &str) -> Option<Self> {
        let captures = filename_pattern().captures(filename)?;
        let sequence = match captures[1].parse::<u64>() {
            Ok(sequence) => sequence,
            Err(_) => {
                tracing::warn!(filename = %filename, "Ignoring migration file, sequence number out of range");
                return None;
            }
        };
        Some(Self {
            sequence,
            slug: captures[2].to_ascii_lowercase(),
            filename: filename.to_string(),
            path: dir.join(filename),
            body: OnceCell::new(),
        })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The script text, read from disk the first time it's requested.
    pub fn body(&self) -> Result<&str, Error> {
        if let Some(body) = self.body.get() {
            return Ok(body);
        }
        let text = fs::read_to_string(&self.path).map_err(|e| Error::io(&self.path, e))?;
        Ok(self.body.get_or_init(|| text))
    }
}

/// Turn free text into a slug: trim, drop anything but ASCII letters, digits,
/// spaces and hyphens, then hyphenate spaces and lowercase.
pub fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '-')
        .map(|c| if c == ' ' { '-' } else { c.to_ascii_lowercase() })
        .collect()
}

/// The migrations directory.
#[derive(Debug, Clone)]
pub struct ScriptStore {
    dir: PathBuf,
}

impl ScriptStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "migrations directory {} doesn't exist",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All migration scripts, ordered by sequence number. Scripts sharing a
    /// sequence number are ordered by filename.
    pub fn list(&self) -> Result<Vec<MigrationScript>, Error> {
        let entries = fs::read_dir(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        let mut scripts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.dir, e))?;
            let file_type = entry.file_type().map_err(|e| Error::io(entry.path(), e))?;
            if !(file_type.is_file() || (file_type.is_symlink() && entry.path().is_file())) {
                continue;
            }
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(script) = MigrationScript::from_filename(&self.dir, &filename) {
                scripts.push(script);
            }
        }
        sort_scripts(&mut scripts);
        tracing::debug!(dir = %self.dir.display(), count = scripts.len(), "Discovered migration scripts");
        Ok(scripts)
    }

    /// The script called `filename`, if it is a migration file in this directory.
    pub fn get(&self, filename: &str) -> Result<MigrationScript, Error> {
        MigrationScript::from_filename(&self.dir, filename)
            .filter(|script| script.path.is_file())
            .ok_or_else(|| Error::NotFound(filename.to_string()))
    }

    /// The body of the script called `filename`.
    pub fn read(&self, filename: &str) -> Result<String, Error> {
        Ok(self.get(filename)?.body()?.to_string())
    }

    /// Work out the script `create` would write, without touching the filesystem.
    pub fn plan(
        &self,
        name: &str,
        mode: SequenceMode,
        now: DateTime<Utc>,
    ) -> Result<MigrationScript, Error> {
        let slug = sanitize_name(name);
        let prefix = match mode {
            SequenceMode::Sequential { width } => {
                let last = self
                    .list()?
                    .iter()
                    .map(MigrationScript::sequence)
                    .max()
                    .unwrap_or(0);
                let next = last.checked_add(1).ok_or_else(|| {
                    Error::Config(format!(
                        "sequence {} is the largest possible, no further script can follow it",
                        last
                    ))
                })?;
                format!("{:0width$}", next, width = width)
            }
            SequenceMode::Timestamp => now.timestamp().to_string(),
        };
        let filename = format!("{}.{}.sql", prefix, slug);
        MigrationScript::from_filename(&self.dir, &filename)
            .ok_or_else(|| Error::InvalidName(name.to_string()))
    }

    /// Create a new, empty script.
    pub fn create(&self, name: &str, mode: SequenceMode) -> Result<MigrationScript, Error> {
        self.create_at(name, mode, Utc::now())
    }

    pub fn create_at(
        &self,
        name: &str,
        mode: SequenceMode,
        now: DateTime<Utc>,
    ) -> Result<MigrationScript, Error> {
        let script = self.plan(name, mode, now)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&script.path)
            .map_err(|e| Error::io(&script.path, e))?;
        tracing::info!(filename = %script.filename, "Created migration file");
        Ok(script)
    }
}

pub(crate) fn sort_scripts(scripts: &mut [MigrationScript]) {
    scripts.sort_by(|a, b| {
        a.sequence
            .cmp(&b.sequence)
            .then_with(|| a.filename.cmp(&b.filename))
    });
}
