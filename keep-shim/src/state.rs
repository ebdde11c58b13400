//! The shim's own HTTP-visible state record (spec §6 "State file schema",
//! shim extension): `{ID, Runtime, State, Status:{PID, exited, exitStatus,
//! waitStatus}}`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessStatus {
    #[serde(rename = "PID")]
    pub pid: Option<i32>,
    pub exited: bool,
    #[serde(rename = "exitStatus")]
    pub exit_status: Option<i32>,
    #[serde(rename = "waitStatus")]
    pub wait_status: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimState {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Runtime")]
    pub runtime: String,
    #[serde(rename = "State")]
    pub state: serde_json::Value,
    #[serde(rename = "Status")]
    pub status: ProcessStatus,
}
