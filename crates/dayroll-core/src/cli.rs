use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::task::{BacklogOrder, DayStart};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "dayroll",
    version,
    about = "Daily task list that rolls over at your day boundary",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rcfile", global = true)]
    pub rcfile: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListView {
    #[default]
    Today,
    Backlog,
    Recurring,
    Done,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderedList {
    Today,
    Backlog,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a task to today (or the backlog)
    Add {
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
        #[arg(long)]
        backlog: bool,
        #[arg(long)]
        urgent: bool,
        #[arg(long)]
        category: Option<String>,
    },
    /// Show one of the lists
    List {
        #[arg(value_enum, default_value_t = ListView::Today)]
        view: ListView,
        #[arg(long)]
        sort: Option<BacklogOrder>,
    },
    /// Toggle done on a today task
    Done { id: String },
    /// Toggle the urgent flag
    Urgent { id: String },
    /// Move a finished today task to the archive now
    Archive { id: String },
    /// Delete a task or an archive record
    Delete { id: String },
    Edit {
        id: String,
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
    },
    /// Replace a task's note; no text clears it
    Note { id: String, text: Vec<String> },
    /// Set or clear a task's category
    Categorize { id: String, category: Option<String> },
    Snooze {
        id: String,
        #[arg(required_unless_present = "clear")]
        when: Option<String>,
        #[arg(long, conflicts_with = "when")]
        clear: bool,
    },
    /// Send a today task to the backlog
    Postpone { id: String },
    /// Bring a backlog task to today
    Pick { id: String },
    /// Make a task recurring, or change an existing recurrence
    Recur {
        id: String,
        pattern: String,
        days: Vec<String>,
    },
    /// List recurring tasks due in the current day window
    Ready,
    /// Add every ready recurring task to today
    Surface,
    /// Add one instance of a recurring task to today
    Instance { id: String },
    /// Turn a recurring task back into a one-off task
    Unrecur {
        id: String,
        #[arg(long)]
        backlog: bool,
    },
    /// Move a task to a new position (1-based)
    Reorder {
        #[arg(value_enum)]
        list: OrderedList,
        from: usize,
        to: usize,
    },
    /// Put unfinished today tasks before finished ones
    Sort,
    /// Run the day rollover now if it is due
    Rollover,
    Export { path: PathBuf },
    Import { path: PathBuf },
    Settings {
        #[arg(long)]
        day_start: Option<DayStart>,
        #[arg(long)]
        sort: Option<BacklogOrder>,
    },
    #[command(subcommand)]
    Category(CategoryCommand),
    /// Store a session for the remote replica
    Login {
        #[arg(long)]
        identity: String,
        #[arg(long)]
        token: String,
    },
    /// Forget the session, optionally deleting the remote document
    Logout {
        #[arg(long)]
        purge: bool,
    },
    /// Pull (migrating if the remote is empty), then push
    Sync,
    /// Keep rolling over and syncing until interrupted
    Watch,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CategoryCommand {
    Add { name: String, color: String },
    Rename {
        id: String,
        name: String,
        color: Option<String>,
    },
    Delete { id: String },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = match (quiet, verbose) {
        (2.., _) => "error",
        (1, _) => "warn",
        (_, 3..) => "trace",
        (_, 2) => "debug",
        (_, 1) => "info",
        _ => "warn",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pull positional `rc.key=value` / `rc.key:value` tokens out before clap
/// sees them.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> PreprocessedArgs {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_tokens_are_stripped() {
        let pre = preprocess_args(&args(&[
            "dayroll",
            "rc.color=off",
            "list",
            "rc.sync.poll_seconds:5",
            "backlog",
        ]));
        assert_eq!(pre.cleaned_args, args(&["dayroll", "list", "backlog"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.sync.poll_seconds".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn subcommands_parse() {
        let cli = GlobalCli::parse_from(["dayroll", "-v", "add", "buy", "milk", "--urgent"]);
        assert_eq!(cli.verbose, 1);
        let Some(Command::Add { title, urgent, backlog, .. }) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(title, ["buy", "milk"]);
        assert!(urgent);
        assert!(!backlog);

        let cli = GlobalCli::parse_from(["dayroll", "settings", "--day-start", "06:30"]);
        let Some(Command::Settings { day_start, sort }) = cli.command else {
            panic!("expected settings");
        };
        assert_eq!(day_start.map(|d| d.to_string()).as_deref(), Some("06:30"));
        assert!(sort.is_none());

        assert!(GlobalCli::try_parse_from(["dayroll", "snooze", "abc"]).is_err());
    }
}
