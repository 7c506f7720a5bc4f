use crate::config::ServerEntry;
use crate::context::PORT_TIMEOUT;
use globset::Glob;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::debug;

/// A server entry with one of its ports found listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedServer {
    pub name: String,
    pub port: u16,
    pub glyph: String,
}

/// A program invocation, compared by value so identical ones run once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

/// Platform-specific way of asking the OS whether a TCP port is listening.
pub trait PortLister: Send + Sync + Debug {
    fn invocation(&self, port: u16) -> Invocation;

    /// Interpret the stdout of [`PortLister::invocation`] for `port`.
    fn is_listening(&self, port: u16, stdout: &str) -> bool;
}

/// `lsof -nP -iTCP:<port> -sTCP:LISTEN`: any process line means listening.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lsof;

impl PortLister for Lsof {
    fn invocation(&self, port: u16) -> Invocation {
        Invocation {
            program: "lsof".to_string(),
            args: vec![
                "-nP".to_string(),
                format!("-iTCP:{port}"),
                "-sTCP:LISTEN".to_string(),
            ],
        }
    }

    fn is_listening(&self, _port: u16, stdout: &str) -> bool {
        stdout
            .lines()
            .map(str::trim)
            .any(|l| !l.is_empty() && !l.starts_with("COMMAND"))
    }
}

/// `netstat -ano -p TCP`: one listing shared by every port.
#[derive(Debug, Clone, Copy, Default)]
pub struct Netstat;

impl PortLister for Netstat {
    fn invocation(&self, _port: u16) -> Invocation {
        Invocation {
            program: "netstat".to_string(),
            args: vec!["-ano".to_string(), "-p".to_string(), "TCP".to_string()],
        }
    }

    fn is_listening(&self, port: u16, stdout: &str) -> bool {
        let suffix = format!(":{port}");
        stdout.lines().any(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            cols.len() >= 4
                && cols[0].eq_ignore_ascii_case("TCP")
                && cols[1].ends_with(&suffix)
                && cols[3].eq_ignore_ascii_case("LISTENING")
        })
    }
}

/// `netstat -an` as found on Linux and macOS: a `tcp*` row whose local
/// address ends in `:<port>` or `.<port>` and whose state is `LISTEN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixNetstat;

impl PortLister for UnixNetstat {
    fn invocation(&self, _port: u16) -> Invocation {
        Invocation {
            program: "netstat".to_string(),
            args: vec!["-an".to_string()],
        }
    }

    fn is_listening(&self, port: u16, stdout: &str) -> bool {
        let colon = format!(":{port}");
        let dot = format!(".{port}");
        stdout.lines().any(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            cols.len() >= 6
                && cols[0].to_ascii_lowercase().starts_with("tcp")
                && (cols[3].ends_with(&colon) || cols[3].ends_with(&dot))
                && cols[5].eq_ignore_ascii_case("LISTEN")
        })
    }
}

/// The lister for the platform this binary was built for.
pub fn platform_lister() -> Arc<dyn PortLister> {
    #[cfg(windows)]
    {
        Arc::new(Netstat)
    }
    #[cfg(not(windows))]
    {
        Arc::new(Lsof)
    }
}

/// Used when the platform lister is not installed. `lsof` is often missing
/// from minimal Linux images while `netstat` is not.
pub fn platform_fallback() -> Option<Arc<dyn PortLister>> {
    #[cfg(windows)]
    {
        None
    }
    #[cfg(not(windows))]
    {
        Some(Arc::new(UnixNetstat))
    }
}

/// How one listing invocation ended.
#[derive(Debug)]
enum Listing {
    Output(String),
    /// The program does not exist.
    Missing,
    Failed,
}

/// Finds which configured servers are currently listening.
#[derive(Debug, Clone)]
pub struct ServerDetector {
    lister: Arc<dyn PortLister>,
    fallback: Option<Arc<dyn PortLister>>,
    timeout: Duration,
    project_root: PathBuf,
}

impl ServerDetector {
    pub fn new(lister: Arc<dyn PortLister>, project_root: PathBuf) -> Self {
        Self {
            lister,
            fallback: None,
            timeout: PORT_TIMEOUT,
            project_root,
        }
    }

    /// [`platform_lister`] backed by [`platform_fallback`].
    pub fn for_platform(project_root: PathBuf) -> Self {
        Self::new(platform_lister(), project_root).with_fallback(platform_fallback())
    }

    /// Ports whose lister program is missing are retried with `fallback`.
    pub fn with_fallback(mut self, fallback: Option<Arc<dyn PortLister>>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn detect(&self, servers: &[ServerEntry]) -> Vec<DetectedServer> {
        let ports: Vec<u16> = servers
            .iter()
            .filter(|s| s.enabled)
            .flat_map(|s| s.ports.iter().copied())
            .collect();
        if ports.is_empty() {
            return Vec::new();
        }
        let listening = self.listening_ports(&ports).await;
        assign(servers, &listening, &self.project_root)
    }

    async fn listening_ports(&self, ports: &[u16]) -> HashSet<u16> {
        let (mut listening, missing) = self.scan(&self.lister, ports).await;
        if missing.is_empty() {
            return listening;
        }
        if let Some(fallback) = &self.fallback {
            debug!(ports = ?missing, fallback = ?fallback, "retrying with fallback lister");
            let (found, _) = self.scan(fallback, &missing).await;
            listening.extend(found);
        }
        listening
    }

    /// Run each distinct invocation of `lister` once, concurrently. Returns
    /// the ports reported as listening and the ports whose program is missing.
    async fn scan(
        &self,
        lister: &Arc<dyn PortLister>,
        ports: &[u16],
    ) -> (HashSet<u16>, Vec<u16>) {
        let mut by_invocation: HashMap<Invocation, Vec<u16>> = HashMap::new();
        for &port in ports {
            let ports = by_invocation.entry(lister.invocation(port)).or_default();
            if !ports.contains(&port) {
                ports.push(port);
            }
        }

        let mut set: JoinSet<(HashSet<u16>, Vec<u16>)> = JoinSet::new();
        for (invocation, ports) in by_invocation {
            let lister = Arc::clone(lister);
            let timeout = self.timeout;
            set.spawn(async move {
                match run_listing(&invocation, timeout).await {
                    Listing::Output(stdout) => (
                        ports
                            .into_iter()
                            .filter(|&p| lister.is_listening(p, &stdout))
                            .collect(),
                        Vec::new(),
                    ),
                    Listing::Missing => (HashSet::new(), ports),
                    Listing::Failed => (HashSet::new(), Vec::new()),
                }
            });
        }

        let mut listening = HashSet::new();
        let mut missing = Vec::new();
        while let Some(res) = set.join_next().await {
            if let Ok((found, absent)) = res {
                listening.extend(found);
                missing.extend(absent);
            }
        }
        missing.sort_unstable();
        (listening, missing)
    }
}

async fn run_listing(invocation: &Invocation, timeout: Duration) -> Listing {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => {
            Listing::Output(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Err(err)) if err.kind() == ErrorKind::NotFound => {
            debug!(program = %invocation.program, "port lister not installed");
            Listing::Missing
        }
        Ok(Err(err)) => {
            debug!(program = %invocation.program, error = %err, "port listing unavailable");
            Listing::Failed
        }
        Err(_) => {
            debug!(program = %invocation.program, "port listing timed out");
            Listing::Failed
        }
    }
}

/// Map listening ports onto server entries.
///
/// Each enabled entry reports its first listening port in configured order.
/// Entries sharing a port are reordered among their own positions so that
/// entries whose patterns match `project_root` come first.
pub fn assign(
    servers: &[ServerEntry],
    listening: &HashSet<u16>,
    project_root: &Path,
) -> Vec<DetectedServer> {
    let mut detected: Vec<(DetectedServer, &ServerEntry)> = servers
        .iter()
        .filter(|s| s.enabled)
        .filter_map(|s| {
            let port = s.ports.iter().copied().find(|p| listening.contains(p))?;
            Some((
                DetectedServer {
                    name: s.name.clone(),
                    port,
                    glyph: s.glyph.clone(),
                },
                s,
            ))
        })
        .collect();

    let mut positions: BTreeMap<u16, Vec<usize>> = BTreeMap::new();
    for (i, (server, _)) in detected.iter().enumerate() {
        positions.entry(server.port).or_default().push(i);
    }

    for slots in positions.values().filter(|slots| slots.len() > 1) {
        let mut group: Vec<(DetectedServer, bool)> = slots
            .iter()
            .map(|&i| {
                let (server, entry) = &detected[i];
                (server.clone(), patterns_match(project_root, &entry.patterns))
            })
            .collect();
        // Stable: ties keep configured order.
        group.sort_by_key(|(_, matched)| !matched);
        for (&slot, (server, _)) in slots.iter().zip(group) {
            detected[slot].0 = server;
        }
    }

    detected.into_iter().map(|(server, _)| server).collect()
}

/// True when any pattern matches the top level of `root`.
///
/// `dir/` needs a directory, glob patterns are matched against entry names,
/// anything else must exist as a path.
pub fn patterns_match(root: &Path, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(dir) = pattern.strip_suffix('/') {
            return root.join(dir).is_dir();
        }
        if pattern.contains(|c: char| matches!(c, '*' | '?' | '[' | '{')) {
            let Ok(glob) = Glob::new(pattern).map(|g| g.compile_matcher()) else {
                return false;
            };
            let Ok(entries) = std::fs::read_dir(root) else {
                return false;
            };
            return entries
                .flatten()
                .any(|e| glob.is_match(e.file_name()));
        }
        root.join(pattern).exists()
    })
}
