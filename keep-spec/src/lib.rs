//! OCI bundle spec loading and on-disk container state (spec §4.1).
//!
//! Deliberately thin: the `Spec` type is `oci_spec::runtime::Spec` itself
//! (the teacher already pulls in `oci-spec` for image config, so extending
//! to its runtime module keeps the one dependency rather than hand-rolling
//! a parallel set of OCI types). This crate only adds what `oci-spec`
//! doesn't carry: the `state.json` extensions (creation time) and the
//! load/refresh/mutate operations that give the status state machine its
//! self-healing `/proc` refresh.

pub mod state;

pub use oci_spec::runtime::{Spec, State as RuntimeState};
pub use state::{ContainerStatus, StateStore};
