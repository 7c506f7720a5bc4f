use crate::context::GIT_TIMEOUT;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Branch text used when HEAD is detached and no commit hash is available.
pub const DETACHED: &str = "detached";

const DIAGNOSTIC_MAX: usize = 80;

/// How a single repository probe ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProbeOutcome {
    #[default]
    Ok,
    NotARepo,
    Timeout,
    /// Carries a one-line diagnostic.
    Error(String),
}

/// The status of a single configured repository for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryStatus {
    pub name: String,
    /// Abbreviated name for compact rendering.
    pub short_name: Option<String>,
    pub branch: String,
    pub is_detached: bool,
    /// Commits ahead of the upstream (unpushed).
    pub ahead: usize,
    /// Commits behind the upstream (need pull).
    pub behind: usize,
    pub dirty: bool,
    pub outcome: ProbeOutcome,
}

impl RepositoryStatus {
    /// A status with neutral fields and the given non-ok outcome.
    pub fn failed(name: impl Into<String>, outcome: ProbeOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
            ..Self::default()
        }
    }

    pub fn with_short_name(mut self, short_name: Option<String>) -> Self {
        self.short_name = short_name;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == ProbeOutcome::Ok
    }
}

/// The fixed set of git invocations this crate is allowed to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitQuery {
    InsideWorkTree,
    TopLevel,
    SymbolicHead,
    ShortHead,
    Porcelain,
    AheadBehind,
    OriginUrl,
}

impl GitQuery {
    pub fn args(self) -> &'static [&'static str] {
        match self {
            GitQuery::InsideWorkTree => &["rev-parse", "--is-inside-work-tree"],
            GitQuery::TopLevel => &["rev-parse", "--show-toplevel"],
            GitQuery::SymbolicHead => &["symbolic-ref", "--quiet", "--short", "HEAD"],
            GitQuery::ShortHead => &["rev-parse", "--short", "HEAD"],
            GitQuery::Porcelain => &["status", "--porcelain"],
            GitQuery::AheadBehind => &[
                "rev-list",
                "--left-right",
                "--count",
                "HEAD...@{upstream}",
            ],
            GitQuery::OriginUrl => &["remote", "get-url", "origin"],
        }
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git timed out after {0:?}")]
    Timeout(Duration),
    #[error("cannot run git: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("{0}")]
    NotARepo(String),
    #[error("{stderr}")]
    Failed { code: Option<i32>, stderr: String },
}

/// A git executable plus the per-invocation timeout.
#[derive(Debug, Clone)]
pub struct Git {
    program: PathBuf,
    timeout: Duration,
}

impl Default for Git {
    fn default() -> Self {
        Self::new(GIT_TIMEOUT)
    }
}

impl Git {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("git"),
            timeout,
        }
    }

    /// Use a different executable in place of `git` from `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one whitelisted query in `repo_path` and return its stdout.
    ///
    /// The child is killed if the timeout elapses first.
    pub async fn run(&self, repo_path: &Path, query: GitQuery) -> Result<String, GitError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(query.args())
            .current_dir(repo_path)
            .env("GIT_OPTIONAL_LOCKS", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| GitError::Timeout(self.timeout))??;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let line = diagnostic(&stderr);
        if stderr.to_ascii_lowercase().contains("not a git repository") {
            Err(GitError::NotARepo(line))
        } else {
            Err(GitError::Failed {
                code: output.status.code(),
                stderr: line,
            })
        }
    }
}

/// First non-empty line, trimmed and capped in length.
fn diagnostic(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("git failed");
    line.chars().take(DIAGNOSTIC_MAX).collect()
}

/// Parse `rev-list --left-right --count` output into `(ahead, behind)`.
pub fn parse_ahead_behind(raw: &str) -> (usize, usize) {
    let mut parts = raw.split_whitespace().map(|p| p.parse::<usize>().unwrap_or(0));
    let ahead = parts.next().unwrap_or(0);
    let behind = parts.next().unwrap_or(0);
    (ahead, behind)
}

/// Produces a [`RepositoryStatus`] for one path. Never fails: every problem is
/// folded into [`ProbeOutcome`].
#[derive(Debug, Clone, Default)]
pub struct RepositoryProbe {
    git: Git,
}

impl RepositoryProbe {
    pub fn new(git: Git) -> Self {
        Self { git }
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub async fn probe(&self, name: &str, path: &Path) -> RepositoryStatus {
        if !path.is_dir() {
            debug!(repo = name, path = %path.display(), "repository path missing");
            return RepositoryStatus::failed(name, ProbeOutcome::NotARepo);
        }

        match self.git.run(path, GitQuery::InsideWorkTree).await {
            Ok(raw) if raw.trim() == "true" => {}
            Ok(_) => return RepositoryStatus::failed(name, ProbeOutcome::NotARepo),
            Err(err) => return failure(name, err),
        }
        // A plain subdirectory of some enclosing repository is not a repository.
        match self.git.run(path, GitQuery::TopLevel).await {
            Ok(raw) if same_dir(Path::new(raw.trim()), path) => {}
            Ok(raw) => {
                debug!(repo = name, top_level = raw.trim(), "path is inside another work tree");
                return RepositoryStatus::failed(name, ProbeOutcome::NotARepo);
            }
            Err(err) => return failure(name, err),
        }

        let (head, porcelain, counts) = tokio::join!(
            self.head(path),
            self.git.run(path, GitQuery::Porcelain),
            self.git.run(path, GitQuery::AheadBehind),
        );

        let (branch, is_detached) = match head {
            Ok(head) => head,
            Err(err) => return failure(name, err),
        };
        let dirty = match porcelain {
            Ok(raw) => raw.lines().any(|l| !l.trim().is_empty()),
            Err(err) => return failure(name, err),
        };
        // No upstream is not an error: counts stay at zero.
        let (ahead, behind) = match counts {
            Ok(raw) => parse_ahead_behind(&raw),
            Err(GitError::Timeout(d)) => return failure(name, GitError::Timeout(d)),
            Err(_) => (0, 0),
        };

        RepositoryStatus {
            name: name.to_string(),
            short_name: None,
            branch,
            is_detached,
            ahead,
            behind,
            dirty,
            outcome: ProbeOutcome::Ok,
        }
    }

    /// Returns `(branch, is_detached)`; a detached HEAD reports its short hash.
    async fn head(&self, path: &Path) -> Result<(String, bool), GitError> {
        match self.git.run(path, GitQuery::SymbolicHead).await {
            Ok(raw) if !raw.trim().is_empty() => Ok((raw.trim().to_string(), false)),
            Err(GitError::Timeout(d)) => Err(GitError::Timeout(d)),
            Err(GitError::Spawn(e)) => Err(GitError::Spawn(e)),
            _ => match self.git.run(path, GitQuery::ShortHead).await {
                Ok(raw) if !raw.trim().is_empty() => Ok((raw.trim().to_string(), true)),
                Err(GitError::Timeout(d)) => Err(GitError::Timeout(d)),
                _ => Ok((DETACHED.to_string(), true)),
            },
        }
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn failure(name: &str, err: GitError) -> RepositoryStatus {
    debug!(repo = name, error = %err, "repository probe failed");
    let outcome = match err {
        GitError::Timeout(_) => ProbeOutcome::Timeout,
        GitError::NotARepo(_) => ProbeOutcome::NotARepo,
        other => ProbeOutcome::Error(diagnostic(&other.to_string())),
    };
    RepositoryStatus::failed(name, outcome)
}
