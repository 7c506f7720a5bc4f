use crate::config::EffectiveConfig;
use crate::context::Clock;
use crate::detection::{DetectedServer, ServerDetector};
use crate::git::{ProbeOutcome, RepositoryProbe, RepositoryStatus};
use chrono::{DateTime, Local};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Upper bound on repository probes running at once.
pub const MAX_CONCURRENT: usize = 20;

/// Everything one rendering pass needs. Built once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    /// In configuration order.
    pub repositories: Vec<RepositoryStatus>,
    pub servers: Vec<DetectedServer>,
    pub taken_at: DateTime<Local>,
}

enum Finished {
    Repo(usize, RepositoryStatus),
    Servers(Vec<DetectedServer>),
}

/// Fans out repository probes and server detection, then collects the results.
#[derive(Debug, Clone)]
pub struct StatusAggregator {
    probe: RepositoryProbe,
    detector: ServerDetector,
    max_concurrent: usize,
}

impl StatusAggregator {
    pub fn new(probe: RepositoryProbe, detector: ServerDetector) -> Self {
        Self {
            probe,
            detector,
            max_concurrent: MAX_CONCURRENT,
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Probe every repository and detect servers, waiting for all of them.
    pub async fn aggregate(&self, config: &EffectiveConfig, clock: &dyn Clock) -> StatusSnapshot {
        self.aggregate_until(config, clock, std::future::pending())
            .await
    }

    /// Like [`aggregate`](Self::aggregate), but stop waiting once `cancel`
    /// resolves. Repositories still pending at that point are reported as
    /// timed out.
    pub async fn aggregate_until<F>(
        &self,
        config: &EffectiveConfig,
        clock: &dyn Clock,
        cancel: F,
    ) -> StatusSnapshot
    where
        F: Future<Output = ()>,
    {
        let entries = &config.repositories;
        let mut slots: Vec<Option<RepositoryStatus>> = vec![None; entries.len()];
        let permits = Arc::new(Semaphore::new(
            entries.len().clamp(1, self.max_concurrent),
        ));

        let mut set: JoinSet<Finished> = JoinSet::new();
        for (i, entry) in entries.iter().enumerate() {
            let probe = self.probe.clone();
            let permits = Arc::clone(&permits);
            let name = entry.name.clone();
            let short_name = entry.short_name.clone();
            let path = config.repository_path(entry);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let status = probe.probe(&name, &path).await;
                Finished::Repo(i, status.with_short_name(short_name))
            });
        }

        if !config.servers.is_empty() {
            let detector = self.detector.clone();
            let servers = config.servers.clone();
            set.spawn(async move { Finished::Servers(detector.detect(&servers).await) });
        }

        let mut servers = Vec::new();
        let mut cancelled = false;
        tokio::pin!(cancel);
        loop {
            tokio::select! {
                biased;
                res = set.join_next() => match res {
                    Some(Ok(Finished::Repo(i, status))) => slots[i] = Some(status),
                    Some(Ok(Finished::Servers(found))) => servers = found,
                    Some(Err(err)) => warn!(error = %err, "status task failed"),
                    None => break,
                },
                _ = &mut cancel => {
                    cancelled = true;
                    break;
                }
            }
        }
        set.abort_all();

        let repositories = slots
            .into_iter()
            .zip(entries)
            .map(|(slot, entry)| {
                slot.unwrap_or_else(|| {
                    let outcome = if cancelled {
                        ProbeOutcome::Timeout
                    } else {
                        ProbeOutcome::Error("probe task failed".to_string())
                    };
                    RepositoryStatus::failed(entry.name.clone(), outcome)
                        .with_short_name(entry.short_name.clone())
                })
            })
            .collect::<Vec<_>>();

        debug!(
            repos = repositories.len(),
            servers = servers.len(),
            cancelled,
            "snapshot complete"
        );

        StatusSnapshot {
            repositories,
            servers,
            taken_at: clock.now(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{RepoKind, RepositoryEntry};
    use crate::context::FixedClock;
    use crate::detection::platform_lister;
    use crate::git::Git;
    use chrono::TimeZone;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    /// A stand-in git that answers like a clean repository on `main`,
    /// sleeping first inside any directory whose path contains `slow`.
    fn fake_git(dir: &Path, slow_secs: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-git");
        let script = format!(
            "#!/bin/sh\n\
             case \"$(pwd -P)\" in *slow*) sleep {slow_secs};; esac\n\
             case \"$1\" in\n  \
               rev-parse) case \"$2\" in --show-toplevel) pwd -P;; *) echo true;; esac;;\n  \
               symbolic-ref) echo main;;\n  \
               rev-list) printf '0\\t2\\n';;\n\
             esac\n"
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config_with(root: &Path, dirs: &[&str]) -> EffectiveConfig {
        let mut cfg = EffectiveConfig::builtin(root);
        for dir in dirs {
            std::fs::create_dir_all(root.join(dir)).unwrap();
            cfg.repositories.push(RepositoryEntry {
                name: dir.to_uppercase(),
                path: PathBuf::from(dir),
                kind: RepoKind::Main,
                short_name: None,
            });
        }
        cfg
    }

    fn aggregator(program: PathBuf, timeout: Duration, root: &Path) -> StatusAggregator {
        StatusAggregator::new(
            RepositoryProbe::new(Git::new(timeout).with_program(program)),
            ServerDetector::new(platform_lister(), root.to_path_buf()),
        )
    }

    fn clock() -> FixedClock {
        FixedClock(Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
    }

    #[tokio::test]
    async fn test_order_follows_config_not_completion() {
        let tools = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let cfg = config_with(root.path(), &["slow_api", "web", "docs"]);
        let agg = aggregator(
            fake_git(tools.path(), "0.5"),
            Duration::from_secs(10),
            root.path(),
        );

        let snap = agg.aggregate(&cfg, &clock()).await;
        let names: Vec<&str> = snap.repositories.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["SLOW_API", "WEB", "DOCS"]);
        assert!(snap.repositories.iter().all(|r| r.is_ok()));
        assert_eq!(snap.repositories[0].behind, 2);
        assert_eq!(snap.taken_at, clock().0);
        assert!(snap.servers.is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_cap_of_one_still_completes() {
        let tools = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let cfg = config_with(root.path(), &["a", "b", "c", "d"]);
        let agg = aggregator(
            fake_git(tools.path(), "0"),
            Duration::from_secs(10),
            root.path(),
        )
        .with_max_concurrent(1);

        let snap = agg.aggregate(&cfg, &clock()).await;
        assert_eq!(snap.repositories.len(), 4);
    }

    #[tokio::test]
    async fn test_cancel_marks_pending_as_timeout() {
        let tools = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let cfg = config_with(root.path(), &["web", "slow_api"]);
        let agg = aggregator(
            fake_git(tools.path(), "5"),
            Duration::from_secs(30),
            root.path(),
        );

        let started = Instant::now();
        let snap = agg
            .aggregate_until(
                &cfg,
                &clock(),
                tokio::time::sleep(Duration::from_millis(1500)),
            )
            .await;
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(snap.repositories.len(), 2);
        assert!(snap.repositories[0].is_ok());
        assert_eq!(snap.repositories[1].outcome, ProbeOutcome::Timeout);
        assert_eq!(snap.repositories[1].name, "SLOW_API");
    }

    #[tokio::test]
    async fn test_missing_path_does_not_stop_siblings() {
        let tools = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let mut cfg = config_with(root.path(), &["web"]);
        cfg.repositories.insert(
            0,
            RepositoryEntry {
                name: "GONE".into(),
                path: PathBuf::from("does/not/exist"),
                kind: RepoKind::Main,
                short_name: Some("G".into()),
            },
        );
        let agg = aggregator(
            fake_git(tools.path(), "0"),
            Duration::from_secs(10),
            root.path(),
        );

        let snap = agg.aggregate(&cfg, &clock()).await;
        assert_eq!(snap.repositories[0].outcome, ProbeOutcome::NotARepo);
        assert_eq!(snap.repositories[0].short_name.as_deref(), Some("G"));
        assert!(snap.repositories[1].is_ok());
    }

    #[tokio::test]
    async fn test_empty_config_gives_empty_snapshot() {
        let tools = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let cfg = EffectiveConfig::builtin(root.path());
        let agg = aggregator(
            fake_git(tools.path(), "0"),
            Duration::from_secs(1),
            root.path(),
        );
        let snap = agg.aggregate(&cfg, &clock()).await;
        assert!(snap.repositories.is_empty());
        assert!(snap.servers.is_empty());
    }
}
