//! `list`: enumerates every container directory under the runtime root.

use std::path::Path;

use keep_common::KeepResult;
use keep_spec::state::StateStore;
use keep_spec::RuntimeState;

pub fn list(root: &Path) -> KeepResult<Vec<RuntimeState>> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return Ok(out);
    };
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let Some(id) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Ok((_store, on_disk)) = StateStore::load(root, &id) {
            out.push(on_disk.state);
        }
    }
    Ok(out)
}
