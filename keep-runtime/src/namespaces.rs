//! Maps the spec's namespace set to `clone(2)` flags (spec §4.3 step 3).

use nix::sched::CloneFlags;
use oci_spec::runtime::{LinuxNamespaceType, Spec};

/// The union of clone flags for every namespace the spec asks for.
/// Mount namespace is not optional in practice (rootfs construction below
/// relies on it) but we still only set it if the spec lists it, matching
/// the host-side bring-up described in spec §4.3.
pub fn clone_flags_for(spec: &Spec) -> CloneFlags {
    let mut flags = CloneFlags::empty();
    let Some(linux) = spec.linux() else {
        return flags;
    };
    let Some(namespaces) = linux.namespaces() else {
        return flags;
    };

    for ns in namespaces {
        flags |= match ns.typ() {
            LinuxNamespaceType::Uts => CloneFlags::CLONE_NEWUTS,
            LinuxNamespaceType::Pid => CloneFlags::CLONE_NEWPID,
            LinuxNamespaceType::Mount => CloneFlags::CLONE_NEWNS,
            LinuxNamespaceType::User => CloneFlags::CLONE_NEWUSER,
            LinuxNamespaceType::Network => CloneFlags::CLONE_NEWNET,
            LinuxNamespaceType::Ipc => CloneFlags::CLONE_NEWIPC,
            LinuxNamespaceType::Cgroup => CloneFlags::CLONE_NEWCGROUP,
            LinuxNamespaceType::Time => CloneFlags::empty(),
        };
    }
    flags
}

pub fn wants_user_namespace(spec: &Spec) -> bool {
    spec.linux()
        .as_ref()
        .and_then(|l| l.namespaces().as_ref())
        .map(|ns| ns.iter().any(|n| *n.typ() == LinuxNamespaceType::User))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oci_spec::runtime::{LinuxBuilder, LinuxNamespaceBuilder, SpecBuilder};

    #[test]
    fn computes_union_of_requested_namespaces() {
        let ns = vec![
            LinuxNamespaceBuilder::default()
                .typ(LinuxNamespaceType::Pid)
                .build()
                .unwrap(),
            LinuxNamespaceBuilder::default()
                .typ(LinuxNamespaceType::Network)
                .build()
                .unwrap(),
        ];
        let linux = LinuxBuilder::default().namespaces(ns).build().unwrap();
        let spec = SpecBuilder::default().linux(linux).build().unwrap();

        let flags = clone_flags_for(&spec);
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
    }
}
