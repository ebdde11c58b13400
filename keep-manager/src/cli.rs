//! `keepctl` CLI surface. `list`, `spec`, and `restart` are SPEC_FULL.md
//! supplemented features; everything else is spec §4.5's manager facade.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "keepctl", about = "Bundle assembly and shim-client facade for the container manager")]
pub struct Cli {
    /// Root directory for bundles (default: XDG/$PROG_ROOT_DIR-resolved).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Path to a log file; defaults to stderr.
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub log_format: keep_common::logging::LogFormat,

    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Create {
        #[arg(long)]
        image: String,
        #[arg(long = "image-dir")]
        image_dir: PathBuf,
        #[arg(long = "runtime", default_value = "keep-runtime")]
        runtime_binary: String,
        #[arg(long = "command-override", num_args = 1..)]
        command_override: Option<Vec<String>>,
        #[arg(long = "env", value_parser = parse_env_kv)]
        env: Vec<(String, String)>,
        #[arg(long)]
        hostname: Option<String>,
        #[arg(long = "rm")]
        remove_on_exit: bool,
        #[arg(long = "exit-command")]
        exit_command: Option<PathBuf>,
        #[arg(long = "exit-command-arg")]
        exit_command_arg: Vec<String>,
        id: String,
    },
    Start {
        #[arg(required = true, num_args = 1..)]
        targets: Vec<String>,
    },
    Stop {
        #[arg(required = true, num_args = 1..)]
        targets: Vec<String>,
    },
    Restart {
        #[arg(required = true, num_args = 1..)]
        targets: Vec<String>,
    },
    Delete {
        #[arg(required = true, num_args = 1..)]
        targets: Vec<String>,
    },
    State {
        id: String,
    },
    List,
    Logs {
        #[arg(long, short = 't')]
        timestamps: bool,
        id: String,
    },
    Attach {
        #[arg(long)]
        tty: bool,
        id: String,
    },
    /// Hidden: invoked by the runtime itself as a `CreateRuntime` hook,
    /// never directly by a user (spec §4.5 "Network setup hook").
    #[command(hide = true, name = "hook")]
    Hook {
        #[command(subcommand)]
        hook: HookCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum HookCommand {
    NetworkSetup,
}

fn parse_env_kv(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid --env entry '{raw}', expected KEY=VALUE"))
}
