//! `state <id>`: prints the OCI state document as JSON.

use std::path::Path;

use keep_common::KeepResult;
use keep_spec::state::StateStore;
use keep_spec::RuntimeState;

pub fn state(root: &Path, id: &str) -> KeepResult<RuntimeState> {
    let (_store, on_disk) = StateStore::load(root, id)?;
    Ok(on_disk.state)
}
