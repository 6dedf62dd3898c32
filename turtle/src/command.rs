//! The command surface: closed enums parsed from user input.

use crate::database::parse_timestamp;
use crate::error::Error;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt;
use std::str::FromStr;

/// Which part of the migration set `show` lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Show {
    New,
    Applied,
    All,
}

impl FromStr for Show {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Show::New),
            "applied" => Ok(Show::Applied),
            "all" => Ok(Show::All),
            other => Err(Error::UnknownCommand {
                family: "show",
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Show {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Show::New => "new",
            Show::Applied => "applied",
            Show::All => "all",
        })
    }
}

/// Argument of `mark` and `unmark`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    File(String),
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(Error::InvalidArgument("expected 'all' or a filename".to_string())),
            "all" => Ok(Target::All),
            filename => Ok(Target::File(filename.to_string())),
        }
    }
}

/// Argument of `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyTarget {
    New,
    File(String),
}

impl FromStr for ApplyTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(Error::InvalidArgument("expected 'new' or a filename".to_string())),
            "new" => Ok(ApplyTarget::New),
            filename => Ok(ApplyTarget::File(filename.to_string())),
        }
    }
}

/// Argument of `dump`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpTarget {
    /// Every table except the tracking table. Written `*` or `%`.
    AllTables,
    Table(String),
}

impl FromStr for DumpTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(Error::InvalidArgument("expected a table name or '*'".to_string())),
            "*" | "%" => Ok(DumpTarget::AllTables),
            table => Ok(DumpTarget::Table(table.to_string())),
        }
    }
}

/// Where `log` starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSince {
    /// `-`: the checkpoint saved by the previous `log`.
    Checkpoint,
    /// UTC, matching the session time zone set by `mysql::connect`.
    /// Unix seconds are converted directly.
    At(NaiveDateTime),
}

impl FromStr for LogSince {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "-" {
            return Ok(LogSince::Checkpoint);
        }
        if let Ok(ts) = parse_timestamp(s) {
            return Ok(LogSince::At(ts));
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(LogSince::At(date.and_time(Default::default())));
        }
        if let Some(ts) = s
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
        {
            return Ok(LogSince::At(ts.naive_utc()));
        }
        Err(Error::InvalidArgument(format!(
            "'{}' is not a timestamp or '-'",
            s
        )))
    }
}

/// One invocation's command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create { name: String },
    Show(Show),
    Mark(Target),
    Unmark(Target),
    Apply(ApplyTarget),
    Dump(DumpTarget),
    Log(LogSince),
}

impl Command {
    /// Build a command from its name and raw argument.
    pub fn parse(name: &str, argument: &str) -> Result<Self, Error> {
        match name {
            "create" => {
                if argument.trim().is_empty() {
                    return Err(Error::InvalidArgument("create needs a name".to_string()));
                }
                Ok(Command::Create {
                    name: argument.to_string(),
                })
            }
            "show" => Ok(Command::Show(argument.parse()?)),
            "mark" => Ok(Command::Mark(argument.parse()?)),
            "unmark" => Ok(Command::Unmark(argument.parse()?)),
            "apply" => Ok(Command::Apply(argument.parse()?)),
            "dump" => Ok(Command::Dump(argument.parse()?)),
            "log" => Ok(Command::Log(argument.parse()?)),
            other => Err(Error::UnknownCommand {
                family: "top-level",
                name: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Show(_) => "show",
            Command::Mark(_) => "mark",
            Command::Unmark(_) => "unmark",
            Command::Apply(_) => "apply",
            Command::Dump(_) => "dump",
            Command::Log(_) => "log",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> LogSince {
        LogSince::At(parse_timestamp(s).unwrap())
    }

    #[test]
    fn show_is_closed() {
        assert_eq!("new".parse::<Show>().unwrap(), Show::New);
        assert_eq!("applied".parse::<Show>().unwrap(), Show::Applied);
        assert_eq!("all".parse::<Show>().unwrap(), Show::All);
        assert!(matches!(
            "pending".parse::<Show>(),
            Err(Error::UnknownCommand { family: "show", name }) if name == "pending"
        ));
    }

    #[test]
    fn targets() {
        assert_eq!("all".parse::<Target>().unwrap(), Target::All);
        assert_eq!(
            "0001.init.sql".parse::<Target>().unwrap(),
            Target::File("0001.init.sql".to_string())
        );
        assert_eq!("new".parse::<ApplyTarget>().unwrap(), ApplyTarget::New);
        assert_eq!("*".parse::<DumpTarget>().unwrap(), DumpTarget::AllTables);
        assert_eq!("%".parse::<DumpTarget>().unwrap(), DumpTarget::AllTables);
        assert_eq!(
            "users".parse::<DumpTarget>().unwrap(),
            DumpTarget::Table("users".to_string())
        );
        assert!(matches!("".parse::<Target>(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn log_since_formats() {
        assert_eq!("-".parse::<LogSince>().unwrap(), LogSince::Checkpoint);
        assert_eq!(
            "2024-02-03 04:05:06".parse::<LogSince>().unwrap(),
            at("2024-02-03 04:05:06")
        );
        assert_eq!(
            "2024-02-03T04:05:06".parse::<LogSince>().unwrap(),
            at("2024-02-03 04:05:06")
        );
        assert_eq!(
            "2024-02-03".parse::<LogSince>().unwrap(),
            at("2024-02-03 00:00:00")
        );
        assert_eq!(
            "1704164645".parse::<LogSince>().unwrap(),
            at("2024-01-02 03:04:05")
        );
        assert!(matches!(
            "last tuesday".parse::<LogSince>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn command_parse() {
        assert_eq!(
            Command::parse("show", "all").unwrap(),
            Command::Show(Show::All)
        );
        assert_eq!(
            Command::parse("apply", "0002.users.sql").unwrap(),
            Command::Apply(ApplyTarget::File("0002.users.sql".to_string()))
        );
        assert!(matches!(
            Command::parse("migrate", "all"),
            Err(Error::UnknownCommand { family: "top-level", .. })
        ));
        assert!(matches!(
            Command::parse("create", "  "),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(Command::parse("log", "-").unwrap().name(), "log");
    }
}
