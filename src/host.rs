//! The JSON document the host program pipes in on stdin.
//!
//! Only the working directory is used; everything else in the payload is
//! ignored.

use serde::Deserialize;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use tracing::debug;

/// Upper bound on bytes read from stdin.
pub const MAX_PAYLOAD: u64 = 1024 * 1024;

/// How long to wait for the host to finish writing stdin.
const STDIN_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Workspace {
    #[serde(default)]
    pub current_dir: Option<PathBuf>,
    #[serde(default)]
    pub current_working_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HostPayload {
    #[serde(default)]
    pub workspace: Option<Workspace>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl HostPayload {
    /// `None` for blank or malformed input.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(raw) {
            Ok(payload) => Some(payload),
            Err(err) => {
                debug!(error = %err, "ignoring malformed host payload");
                None
            }
        }
    }

    /// Read at most [`MAX_PAYLOAD`] bytes from `reader` and parse them.
    pub fn from_reader(reader: impl Read) -> Option<Self> {
        let mut buf = Vec::new();
        if let Err(err) = reader.take(MAX_PAYLOAD).read_to_end(&mut buf) {
            debug!(error = %err, "failed to read host payload");
            return None;
        }
        Self::parse(&String::from_utf8_lossy(&buf))
    }

    /// Payload from stdin, unless stdin is a terminal or the host does not
    /// close it in time.
    pub fn read_stdin() -> Option<Self> {
        if std::io::stdin().is_terminal() {
            return None;
        }
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(Self::from_reader(std::io::stdin().lock()));
        });
        match rx.recv_timeout(STDIN_WAIT) {
            Ok(payload) => payload,
            Err(_) => {
                debug!("stdin not closed in time, ignoring it");
                None
            }
        }
    }

    /// First candidate directory that actually exists.
    pub fn workdir(&self) -> Option<PathBuf> {
        let workspace = self.workspace.as_ref();
        [
            workspace.and_then(|w| w.current_dir.as_ref()),
            workspace.and_then(|w| w.current_working_directory.as_ref()),
            self.cwd.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find(|p| p.is_dir())
        .cloned()
    }
}

/// Working directory for this run: the payload's, else the process's own.
pub fn resolve_workdir(payload: Option<&HostPayload>) -> PathBuf {
    payload
        .and_then(HostPayload::workdir)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}
