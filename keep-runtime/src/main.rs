//! Entry point: the runtime implements both the `host` and `container`
//! roles in one binary, selected by the subcommand invoked (spec §4.3).

mod cli;
mod container;
mod hooks;
mod host;
mod namespaces;
mod spec_cmd;
mod uidmap;

use std::path::PathBuf;

use clap::Parser;

use cli::{Cli, Command};
use keep_common::layout::default_root;

fn main() {
    let cli = Cli::parse();
    let _log_guard = keep_common::logging::init(cli.debug, cli.log_format, cli.log.as_deref());

    let root = cli
        .root
        .clone()
        .unwrap_or_else(|| default_root("keep-runtime"));

    let result = run(&root, cli);

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

fn run(root: &std::path::Path, cli: Cli) -> keep_common::KeepResult<()> {
    match cli.command {
        Command::Create {
            bundle,
            pid_file,
            console_socket,
            no_pivot,
            id,
        } => {
            let self_exe = std::env::current_exe()?;
            host::create::create(
                root,
                host::create::CreateArgs {
                    id,
                    bundle,
                    pid_file,
                    console_socket,
                    no_pivot,
                },
                &self_exe,
            )
        }
        Command::Start { id } => host::start::start(root, &id),
        Command::Kill { id, signal } => {
            let sig = parse_signal(signal.as_deref())?;
            host::kill::kill(root, &id, sig)
        }
        Command::Delete { force, id } => host::delete::delete(root, &id, force),
        Command::State { id } => {
            let state = host::state::state(root, &id)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Command::List => {
            let containers = host::list::list(root)?;
            print_list(&containers);
            Ok(())
        }
        Command::Spec { bundle, rootless } => {
            let bundle = bundle.unwrap_or_else(|| PathBuf::from("."));
            spec_cmd::write_default(&bundle, rootless)
        }
        Command::ContainerInit {
            root: ns_root,
            bundle,
            no_pivot,
            id,
        } => container::init::run(container::init::InitArgs {
            root: ns_root,
            bundle,
            no_pivot,
            id,
        }),
    }
}

fn parse_signal(raw: Option<&str>) -> keep_common::KeepResult<nix::sys::signal::Signal> {
    use nix::sys::signal::Signal;
    match raw {
        None => Ok(Signal::SIGTERM),
        Some(s) => {
            if let Ok(num) = s.parse::<i32>() {
                return Signal::try_from(num)
                    .map_err(|_| keep_common::KeepError::Other(format!("invalid signal {s}")));
            }
            let canonical = if s.starts_with("SIG") { s.to_string() } else { format!("SIG{s}") };
            canonical
                .parse::<Signal>()
                .map_err(|_| keep_common::KeepError::Other(format!("invalid signal {s}")))
        }
    }
}

fn print_list(containers: &[keep_spec::RuntimeState]) {
    use tabled::{Table, Tabled};

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "BUNDLE")]
        bundle: String,
    }

    let rows: Vec<Row> = containers
        .iter()
        .map(|s| Row {
            id: s.id().clone(),
            pid: s.pid().map(|p| p.to_string()).unwrap_or_default(),
            status: s.status().to_string(),
            bundle: s.bundle().clone(),
        })
        .collect();

    println!("{}", Table::new(rows));
}
