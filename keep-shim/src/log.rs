//! Container log framing (spec §6 "Log file schema"): one JSON object per
//! line, `{t, s, m}` with `s ∈ {"stdout","stderr"}`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Stream {
    #[serde(rename = "stdout")]
    Stdout,
    #[serde(rename = "stderr")]
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub t: chrono::DateTime<Utc>,
    pub s: Stream,
    pub m: String,
}

pub struct LogWriter {
    file: Mutex<std::fs::File>,
}

impl LogWriter {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }

    pub fn append(&self, stream: Stream, line: &str) {
        let entry = LogLine { t: Utc::now(), s: stream, m: line.to_string() };
        if let Ok(mut json) = serde_json::to_vec(&entry) {
            json.push(b'\n');
            if let Ok(mut f) = self.file.lock() {
                let _ = f.write_all(&json);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_roundtrips() {
        let line = LogLine { t: Utc::now(), s: Stream::Stdout, m: "hi".into() };
        let json = serde_json::to_string(&line).unwrap();
        let back: LogLine = serde_json::from_str(&json).unwrap();
        assert_eq!(back.m, "hi");
        assert_eq!(back.s, Stream::Stdout);
    }
}
