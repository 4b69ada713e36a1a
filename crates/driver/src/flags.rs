//! Session flag parsing
//!
//! Exactly one of `--init <path>` or `--data <path>` selects the session
//! mode. Unknown options and stray positional arguments are CLI errors; the
//! driver prints the rendered help summary to stderr and exits with code 2.

use clap::{Arg, ArgAction, ArgGroup, Command};
use std::path::PathBuf;

/// The selected session mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    /// Build a fresh context and snapshot it to the path
    Init(PathBuf),
    /// Load the snapshot at the path and run the data session
    Data(PathBuf),
}

impl SessionMode {
    /// The snapshot path of either mode
    pub fn path(&self) -> &PathBuf {
        match self {
            SessionMode::Init(path) => path,
            SessionMode::Data(path) => path,
        }
    }
}

/// The session argument parser
pub fn build_cli(name: &'static str) -> Command {
    Command::new(name)
        .about("SKFS session driver")
        .disable_help_subcommand(true)
        .arg(
            Arg::new("init")
                .long("init")
                .value_name("PATH")
                .action(ArgAction::Set)
                .help("Create a fresh state file at PATH and exit"),
        )
        .arg(
            Arg::new("data")
                .long("data")
                .value_name("PATH")
                .action(ArgAction::Set)
                .help("Run against the state file at PATH"),
        )
        .group(
            ArgGroup::new("session")
                .args(["init", "data"])
                .required(true)
                .multiple(false),
        )
}

/// Parse session flags from an argument vector (including `argv[0]`)
///
/// # Errors
///
/// Returns the rendered clap error (help summary included) for unknown
/// options, positionals, a missing mode, or both modes at once. The caller
/// prints it to stderr and exits with code 2.
pub fn parse_session_args<I, S>(args: I) -> Result<SessionMode, String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    let matches = build_cli("skfs")
        .try_get_matches_from(args)
        .map_err(|e| e.render().to_string())?;

    if let Some(path) = matches.get_one::<String>("init") {
        return Ok(SessionMode::Init(PathBuf::from(path)));
    }
    if let Some(path) = matches.get_one::<String>("data") {
        return Ok(SessionMode::Data(PathBuf::from(path)));
    }
    unreachable!("the session group is required")
}
