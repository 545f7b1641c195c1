use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Command line with positional `rc.` tokens split off.
#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

/// One `key=value` (or `key:value`) setting override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcOverride {
    pub key: String,
    pub value: String,
}

impl RcOverride {
    fn split(raw: &str) -> Option<Self> {
        let (key, value) = raw.split_once('=').or_else(|| raw.split_once(':'))?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        Some(Self {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }

    pub fn into_pair(self) -> (String, String) {
        (self.key, self.value)
    }
}

impl std::str::FromStr for RcOverride {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::split(s).ok_or_else(|| anyhow!("expected KEY=VALUE or KEY:VALUE, got: {s}"))
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pilot",
    version,
    about = "PromptPilot: content calendar for scheduled social posts",
    disable_help_subcommand = true,
    arg_required_else_help = false
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    /// Override a setting for this run, e.g. `--rc upcoming.limit=3`.
    #[arg(
        long = "rc",
        value_name = "KEY=VALUE",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<RcOverride>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<RcOverride>,

    #[arg(long = "pilotrc", value_name = "PATH")]
    pub pilotrc: Option<PathBuf>,

    /// Read posts from a JSON-lines file instead of the configured source.
    #[arg(long = "posts", value_name = "PATH")]
    pub posts: Option<PathBuf>,

    /// Treat this date expression as the current instant.
    #[arg(long = "now", value_name = "EXPR")]
    pub now: Option<String>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

fn default_log_level(verbose: u8, quiet: u8) -> &'static str {
    match (quiet, verbose) {
        (2.., _) => "error",
        (1, _) => "warn",
        (0, 0) => "warn",
        (0, 1) => "info",
        (0, 2) => "debug",
        (0, _) => "trace",
    }
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `-v`/`-q`.
pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let level = default_log_level(verbose, quiet);
    let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .map_err(|e| anyhow!("invalid RUST_LOG filter {directives:?}: {e}"))?,
        _ => EnvFilter::new(level),
    };

    let stderr_is_tty = std::io::stderr().is_terminal();
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_ansi(stderr_is_tty)
        .try_init()
    {
        debug!(error = %err, "global subscriber already installed");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` tokens out of the raw
/// arguments so clap never sees them. The program name is kept as is.
#[tracing::instrument(skip_all, fields(argc = raw.len()))]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let (program, args) = match raw.split_first() {
        Some((program, args)) => (Some(program), args),
        None => (None, raw),
    };

    let mut pre = PreprocessedArgs {
        cleaned_args: program.into_iter().cloned().collect(),
        rc_overrides: Vec::new(),
    };

    for arg in args {
        let positional = arg
            .to_str()
            .and_then(|s| s.strip_prefix("rc."))
            .and_then(RcOverride::split);
        match positional {
            Some(rc) => {
                debug!(key = %rc.key, value = %rc.value, "positional rc override");
                pre.rc_overrides.push(rc.into_pair());
            }
            None => pre.cleaned_args.push(arg.clone()),
        }
    }

    Ok(pre)
}

/// Filter terms, the command word and its arguments, split out of the
/// trailing positional arguments.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub filter_terms: Vec<String>,
    pub command: String,
    pub command_args: Vec<String>,
}

impl Invocation {
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let tokens: Vec<String> = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();

        let default_command = cfg
            .get("default.command")
            .unwrap_or_else(|| "month".to_string());

        if tokens.is_empty() {
            debug!(command = %default_command, "no explicit command, using default");
            return Ok(Self {
                filter_terms: vec![],
                command: default_command,
                command_args: vec![],
            });
        }

        match split_filter_command(&tokens) {
            Some((filter_terms, command, command_args)) => Ok(Self {
                filter_terms,
                command,
                command_args,
            }),
            None => {
                warn!(
                    command = %default_command,
                    "no command detected, treated all terms as filter for default command"
                );
                Ok(Self {
                    filter_terms: tokens,
                    command: default_command,
                    command_args: vec![],
                })
            }
        }
    }
}

/// Exact command names win over abbreviations, so a search word such as
/// `mon` only becomes `month` when no full command name is present.
fn split_filter_command(tokens: &[String]) -> Option<(Vec<String>, String, Vec<String>)> {
    let known = crate::commands::known_command_names();

    let exact = tokens
        .iter()
        .position(|token| known.contains(&token.as_str()))
        .map(|i| (i, tokens[i].clone()));
    let found = exact.or_else(|| {
        tokens.iter().enumerate().find_map(|(i, token)| {
            crate::commands::expand_command_abbrev(token, &known).map(|full| (i, full.to_string()))
        })
    });

    let (i, command) = found?;
    debug!(
        token = %tokens[i],
        expanded = %command,
        split_index = i,
        "resolved command token"
    );
    Some((tokens[..i].to_vec(), command, tokens[i + 1..].to_vec()))
}
