//! Joining the scripts on disk with the tracking table.

use crate::command::Show;
use crate::error::Error;
use crate::script::{sort_scripts, MigrationScript};
use chrono::NaiveDateTime;

/// A script and, if it has been applied, when.
#[derive(Debug, Clone)]
pub struct MigrationEntry {
    pub script: MigrationScript,
    pub applied_at: Option<NaiveDateTime>,
}

impl MigrationEntry {
    pub fn filename(&self) -> &str {
        self.script.filename()
    }

    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Every discovered script with its applied state, in sequence order.
///
/// Tracking rows without a matching file are not represented.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    entries: Vec<MigrationEntry>,
}

impl MigrationSet {
    /// Look up each script with `lookup`, which returns the applied timestamp
    /// for a filename.
    pub fn diff<F>(mut scripts: Vec<MigrationScript>, mut lookup: F) -> Result<Self, Error>
    where
        F: FnMut(&str) -> Result<Option<NaiveDateTime>, Error>,
    {
        sort_scripts(&mut scripts);
        let entries = scripts
            .into_iter()
            .map(|script| {
                let applied_at = lookup(script.filename())?;
                Ok(MigrationEntry { script, applied_at })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let set = Self { entries };
        tracing::debug!(
            total = set.entries.len(),
            pending = set.pending().count(),
            "Reconciled migration scripts"
        );
        Ok(set)
    }

    pub fn entries(&self) -> &[MigrationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, filename: &str) -> Option<&MigrationEntry> {
        self.entries.iter().find(|e| e.filename() == filename)
    }

    pub fn pending(&self) -> impl Iterator<Item = &MigrationEntry> {
        self.entries.iter().filter(|e| !e.is_applied())
    }

    pub fn applied(&self) -> impl Iterator<Item = &MigrationEntry> {
        self.entries.iter().filter(|e| e.is_applied())
    }

    pub fn select(&self, show: Show) -> Vec<&MigrationEntry> {
        match show {
            Show::New => self.pending().collect(),
            Show::Applied => self.applied().collect(),
            Show::All => self.entries.iter().collect(),
        }
    }
}
