//! Control API (spec §6 "Shim HTTP API"): HTTP/1.1 over a Unix stream
//! socket. `GET /` returns shim state, `POST /` drives `start`/`kill`/
//! `delete`, `DELETE /` tears the shim down, `GET /logs` serves the framed
//! container log file.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::net::UnixListener;
use tokio::sync::Notify;

use keep_common::KeepResult;

use crate::runtime_client::RuntimeClient;
use crate::state::{ProcessStatus, ShimState};

pub struct Shared {
    pub id: String,
    pub runtime_name: String,
    pub client: RuntimeClient,
    pub log_path: PathBuf,
    pub basedir: PathBuf,
    pub status: Arc<Mutex<ProcessStatus>>,
    pub shutdown: Notify,
}

pub type SharedState = Arc<Shared>;

pub async fn serve(listener: UnixListener, state: SharedState, ready: Arc<Notify>) -> KeepResult<()> {
    ready.notify_one();
    loop {
        tokio::select! {
            _ = state.shutdown.notified() => {
                tracing::info!(id = %state.id, "shim control server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => { tracing::warn!("accept failed: {e}"); continue; }
                };
                let io = TokioIo::new(stream);
                let state = state.clone();
                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req| {
                        let state = state.clone();
                        async move { Ok::<_, Infallible>(handle(state, req).await) }
                    });
                    if let Err(e) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        tracing::debug!("connection error: {e}");
                    }
                });
            }
        }
    }
}

async fn handle(state: SharedState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match (req.method().clone(), req.uri().path()) {
        (Method::GET, "/") => get_state(&state).await,
        (Method::POST, "/") => post_command(&state, req).await,
        (Method::DELETE, "/") => {
            state.shutdown.notify_one();
            text(StatusCode::OK, "BYE\n")
        }
        (Method::GET, "/logs") => get_logs(&state),
        (_, "/") | (_, "/logs") => text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n"),
        _ => text(StatusCode::NOT_FOUND, "not found\n"),
    }
}

async fn get_state(state: &SharedState) -> Response<Full<Bytes>> {
    match state.client.state(&state.id) {
        Ok(runtime_state) => {
            let status = state.status.lock().unwrap().clone();
            let shim_state = ShimState {
                id: state.id.clone(),
                runtime: state.runtime_name.clone(),
                state: runtime_state,
                status,
            };
            json(StatusCode::OK, &shim_state)
        }
        Err(e) => runtime_error(&e.to_string()),
    }
}

async fn post_command(state: &SharedState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return text(StatusCode::BAD_REQUEST, "failed to read body\n"),
    };
    let form = parse_form(&body);
    let cmd = form.get("cmd").map(String::as_str).unwrap_or("");

    let current = match state.client.state(&state.id) {
        Ok(v) => v,
        Err(e) => return runtime_error(&e.to_string()),
    };
    let status = current
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    match cmd {
        "start" => {
            if status != "created" {
                return status_guard(&state.id, &status, "start");
            }
            if let Err(e) = state.client.start(&state.id) {
                return runtime_error(&e.to_string());
            }
            get_state(state).await
        }
        "kill" => {
            if status != "running" {
                return status_guard(&state.id, &status, "kill");
            }
            let signal = form.get("signal").cloned().unwrap_or_else(|| "15".to_string());
            if let Err(e) = state.client.kill(&state.id, &signal) {
                return runtime_error(&e.to_string());
            }
            get_state(state).await
        }
        "delete" => {
            if status != "stopped" {
                return status_guard(&state.id, &status, "delete");
            }
            if let Err(e) = state.client.delete(&state.id, false) {
                return runtime_error(&e.to_string());
            }
            Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(Full::new(Bytes::new()))
                .unwrap()
        }
        other => text(StatusCode::BAD_REQUEST, &format!("invalid command '{other}'\n")),
    }
}

fn get_logs(state: &SharedState) -> Response<Full<Bytes>> {
    match std::fs::read(&state.log_path) {
        Ok(contents) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/x-ndjson")
            .body(Full::new(Bytes::from(contents)))
            .unwrap(),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e}\n")),
    }
}

/// Terminate path (spec §6 `DELETE /`): SIGKILL if still alive, force-delete
/// via the runtime, recursively remove the base dir.
pub fn terminate(state: &SharedState) {
    let pid = state.status.lock().unwrap().pid;
    if let Some(pid) = pid {
        let _ = signal::kill(Pid::from_raw(pid), Signal::SIGKILL);
    }
    let _ = state.client.delete(&state.id, true);
    let _ = std::fs::remove_dir_all(&state.basedir);
}

fn status_guard(id: &str, status: &str, action: &str) -> Response<Full<Bytes>> {
    text(
        StatusCode::BAD_REQUEST,
        &format!("container '{id}' is {status}, cannot {action}\n"),
    )
}

fn runtime_error(msg: &str) -> Response<Full<Bytes>> {
    if msg.contains("does not exist") {
        text(StatusCode::NOT_FOUND, &format!("{msg}\n"))
    } else {
        text(StatusCode::INTERNAL_SERVER_ERROR, &format!("{msg}\n"))
    }
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn json<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap(),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e}\n")),
    }
}

fn parse_form(body: &[u8]) -> std::collections::HashMap<String, String> {
    let text = String::from_utf8_lossy(body);
    text.split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((
                urlencoding_decode(key),
                urlencoding_decode(value),
            ))
        })
        .collect()
}

/// Minimal `application/x-www-form-urlencoded` decoder: the shim's own form
/// bodies only ever carry ASCII identifiers and signal numbers.
fn urlencoding_decode(s: &str) -> String {
    s.replace('+', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cmd_and_signal() {
        let form = parse_form(b"cmd=kill&signal=9");
        assert_eq!(form.get("cmd").unwrap(), "kill");
        assert_eq!(form.get("signal").unwrap(), "9");
    }

    #[test]
    fn missing_value_defaults_to_empty_string() {
        let form = parse_form(b"cmd=delete&signal=");
        assert_eq!(form.get("signal").unwrap(), "");
    }
}
