//! `start` (spec §4.3 "Start"): requires `created`, dials `ipc.sock`,
//! releases the container with `start-container`, promotes to `running`.

use std::path::Path;

use keep_ipc::HandshakeMessage;
use keep_spec::state::StateStore;

use crate::hooks;

pub fn start(root: &Path, id: &str) -> keep_common::KeepResult<()> {
    let (store, mut on_disk) = StateStore::load(root, id)?;

    if on_disk.status() != oci_spec::runtime::ContainerState::Created {
        return Err(keep_common::KeepError::LifecycleViolation {
            id: id.to_string(),
            status: on_disk.status().to_string(),
            action: "start".to_string(),
        });
    }

    let spec = on_disk.load_spec()?;

    let mut conn = keep_ipc::connect(&store.layout().ipc_sock())?;

    let state_snapshot = on_disk.state.clone();
    hooks::run_fatal(
        spec.hooks().as_ref().and_then(|h| h.prestart().as_ref()),
        &state_snapshot,
    )?;

    keep_ipc::send_message(&mut conn, &HandshakeMessage::StartContainer)?;
    store.mark_started(&mut on_disk)?;

    hooks::run_logged(
        spec.hooks().as_ref().and_then(|h| h.poststart().as_ref()),
        &on_disk.state,
    );

    tracing::info!(id, "container started");
    Ok(())
}
