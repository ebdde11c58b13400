//! CLI surface (spec §6 "Runtime CLI surface").

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "keep-runtime", about = "OCI-compatible container runtime")]
pub struct Cli {
    /// Root directory for container state (default: XDG/$PROG_ROOT_DIR-resolved).
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
        bundle: PathBuf,
        #[arg(long = "pid-file")]
        pid_file: Option<PathBuf>,
        #[arg(long = "console-socket")]
        console_socket: Option<PathBuf>,
        #[arg(long = "no-pivot")]
        no_pivot: bool,
        id: String,
    },
    Start {
        id: String,
    },
    Kill {
        id: String,
        signal: Option<String>,
    },
    Delete {
        #[arg(long)]
        force: bool,
        id: String,
    },
    State {
        id: String,
    },
    List,
    Spec {
        #[arg(long)]
        bundle: Option<PathBuf>,
        #[arg(long)]
        rootless: bool,
    },
    /// Hidden: the container-side role, invoked only by the runtime
    /// re-executing itself after `clone(2)` (spec §4.3, §9 "typed
    /// subcommand enum, not string-matched argv").
    #[command(hide = true, name = "container-init")]
    ContainerInit {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long = "no-pivot")]
        no_pivot: bool,
        id: String,
    },
}
