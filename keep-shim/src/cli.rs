//! Shim CLI surface (spec §6 "Shim CLI surface").

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "keep-shim", about = "Per-container supervising shim")]
pub struct ShimArgs {
    #[arg(long)]
    pub bundle: PathBuf,

    #[arg(long = "container-id")]
    pub container_id: String,

    #[arg(long = "container-log-file")]
    pub container_log_file: Option<PathBuf>,

    #[arg(long = "stdio-dir")]
    pub stdio_dir: Option<PathBuf>,

    #[arg(long, default_value = "keep-runtime")]
    pub runtime: String,

    #[arg(long = "exit-command")]
    pub exit_command: Option<PathBuf>,

    #[arg(long = "exit-command-arg")]
    pub exit_command_arg: Vec<String>,

    #[arg(long)]
    pub root: Option<PathBuf>,

    #[arg(long)]
    pub debug: bool,
}
