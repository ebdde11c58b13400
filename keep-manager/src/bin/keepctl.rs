//! Entry point for the manager CLI: bundle assembly, the shim-client
//! facade, and the `network-setup` hook, all in one binary (spec §4.5).

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use tabled::{Table, Tabled};

use keep_common::layout::default_root;
use keep_manager::cli::{Cli, Command, HookCommand};
use keep_manager::manager::{ContainerSummary, CreateOptions, Manager};
use keep_manager::network;

fn main() {
    let cli = Cli::parse();
    let _log_guard = keep_common::logging::init(cli.debug, cli.log_format, cli.log.as_deref());

    let root = cli.root.clone().unwrap_or_else(|| default_root("keepctl"));

    let result = run(&root, cli);

    if let Err(e) = result {
        eprintln!("Error: {e}");
        // 126 is the manager's own "internal failure" exit code (spec §6);
        // `KeepError::exit_code` only covers the 125/127 split it owns.
        std::process::exit(126);
    }
}

fn run(root: &std::path::Path, cli: Cli) -> anyhow::Result<()> {
    let self_exe = std::env::current_exe()?;
    let manager = Manager::new(root.to_path_buf(), self_exe);

    match cli.command {
        Command::Create {
            image,
            image_dir,
            runtime_binary,
            command_override,
            env,
            hostname,
            remove_on_exit,
            exit_command,
            exit_command_arg,
            id,
        } => {
            let opts = CreateOptions {
                image_name: image,
                image_dir,
                command_override,
                env_override: env,
                hostname_override: hostname,
                remove_on_exit,
                shim_root: root.join("shims"),
                runtime_binary,
                exit_command,
                exit_command_args: exit_command_arg,
            };
            manager.create(&id, opts)?;
            println!("{id}");
            Ok(())
        }
        Command::Start { targets } => run_over_targets(&targets, "start", |t| manager.start(t)),
        Command::Stop { targets } => run_over_targets(&targets, "stop", |t| manager.stop(t)),
        Command::Restart { targets } => run_over_targets(&targets, "restart", |t| manager.restart(t)),
        Command::Delete { targets } => run_over_targets(&targets, "delete", |t| manager.delete(t)),
        Command::State { id } => {
            let state = manager.state(&id)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Command::List => {
            print_list(&manager.list()?);
            Ok(())
        }
        Command::Logs { timestamps, id } => {
            let (client, _record) = client_for(root, &id)?;
            client.copy_logs(timestamps, &mut std::io::stdout())?;
            Ok(())
        }
        Command::Attach { tty, id } => {
            let (client, record) = client_for(root, &id)?;
            let layout = keep_common::layout::ContainerLayout::new(&record.shim_root, &id);
            client.attach(layout.root(), true, true, true, tty)?;
            Ok(())
        }
        Command::Hook { hook } => match hook {
            HookCommand::NetworkSetup => run_network_setup_hook(),
        },
    }
}

fn client_for(
    root: &std::path::Path,
    id: &str,
) -> anyhow::Result<(keep_manager::shim_client::ShimClient, keep_manager::record::ShimRecord)> {
    let bundle = keep_common::layout::BundleLayout::new(root, id);
    let record = keep_manager::record::ShimRecord::load(&bundle)?;
    let layout = keep_common::layout::ContainerLayout::new(&record.shim_root, id);
    Ok((keep_manager::shim_client::ShimClient::new(layout.shim_sock()), record))
}

fn run_over_targets(targets: &[String], verb: &str, mut op: impl FnMut(&str) -> keep_common::KeepResult<()>) -> anyhow::Result<()> {
    let mut errors = Vec::new();
    let mut success_count = 0;

    for target in targets {
        if let Err(e) = op(target) {
            eprintln!("Error {verb}ing container '{target}': {e}");
            errors.push(format!("{target}: {e}"));
        } else {
            println!("{target}");
            success_count += 1;
        }
    }

    if !errors.is_empty() {
        let summary = if success_count > 0 {
            format!("Failed to {verb} {} of {} container(s)", errors.len(), errors.len() + success_count)
        } else {
            format!("Failed to {verb} all {} container(s)", errors.len())
        };
        anyhow::bail!("{summary}\nErrors:\n  {}", errors.join("\n  "));
    }
    Ok(())
}

fn print_list(containers: &[ContainerSummary]) {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "IMAGE")]
        image: String,
        #[tabled(rename = "STATUS")]
        status: String,
    }

    let rows: Vec<Row> = containers
        .iter()
        .map(|c| Row { id: c.id.clone(), image: c.image.clone(), status: c.status.clone() })
        .collect();

    println!("{}", Table::new(rows));
}

/// Runs as `keepctl hook network-setup`, re-exec'd by the runtime as a
/// `CreateRuntime` hook (spec §4.5 "Network setup hook"). Reads the OCI
/// state document the runtime writes to the hook's stdin to learn the
/// container's namespace PID and bundle path.
fn run_network_setup_hook() -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let state: serde_json::Value = serde_json::from_str(&input)?;

    let pid = state
        .get("pid")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| anyhow::anyhow!("hook state payload missing 'pid'"))? as u32;
    let bundle = state
        .get("bundle")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("hook state payload missing 'bundle'"))?;
    let bundle = PathBuf::from(bundle);

    let (tcp, udp) = network::load_exposed_ports(&bundle)?;
    let forwards = network::resolve_forwards(&tcp, &udp, true);

    let rootfs = bundle.join("rootfs");
    let sock_dir = bundle.join("net");
    network::run_hook(pid, &rootfs, &sock_dir, &forwards)?;
    Ok(())
}
