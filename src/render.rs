//! Turns a [`StatusSnapshot`] into the status-line text.

use crate::config::OutputFormat;
use crate::detection::DetectedServer;
use crate::git::{ProbeOutcome, RepositoryStatus};
use crate::monitor::StatusSnapshot;

pub const REPOS_HEADER: &str = "📂 Repos ▶ ";
pub const SERVERS_HEADER: &str = "🖥️ Servers ▶ ";

/// Branch text shown when the probe did not produce one.
const UNKNOWN: &str = "unknown";

/// Behind count from which a repository is shown as badly out of date.
pub const MAJOR_BEHIND: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoGlyph {
    Clean,
    MinorBehind,
    MajorBehind,
    Dirty,
    NotARepo,
    Timeout,
    Error,
}

impl RepoGlyph {
    /// Failures win over dirtiness, dirtiness over the behind count.
    pub fn for_status(status: &RepositoryStatus) -> Self {
        match status.outcome {
            ProbeOutcome::NotARepo => return RepoGlyph::NotARepo,
            ProbeOutcome::Timeout => return RepoGlyph::Timeout,
            ProbeOutcome::Error(_) => return RepoGlyph::Error,
            ProbeOutcome::Ok => {}
        }
        if status.dirty {
            RepoGlyph::Dirty
        } else if status.behind >= MAJOR_BEHIND {
            RepoGlyph::MajorBehind
        } else if status.behind > 0 {
            RepoGlyph::MinorBehind
        } else {
            RepoGlyph::Clean
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            RepoGlyph::Clean => "✅",
            RepoGlyph::MinorBehind => "⚠️",
            RepoGlyph::MajorBehind => "🔴",
            RepoGlyph::Dirty => "🟡",
            RepoGlyph::NotARepo => "🚫",
            RepoGlyph::Timeout => "⛔",
            RepoGlyph::Error => "❌",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RepoGlyph::NotARepo | RepoGlyph::Timeout | RepoGlyph::Error
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ansi {
    Red,
    Yellow,
    Cyan,
    Dim,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
}

impl Ansi {
    fn code(self) -> &'static str {
        match self {
            Ansi::Red => "\x1b[31m",
            Ansi::Yellow => "\x1b[33m",
            Ansi::Cyan => "\x1b[36m",
            Ansi::Dim => "\x1b[2m",
            Ansi::BrightRed => "\x1b[91m",
            Ansi::BrightGreen => "\x1b[92m",
            Ansi::BrightYellow => "\x1b[93m",
            Ansi::BrightBlue => "\x1b[94m",
            Ansi::BrightMagenta => "\x1b[95m",
            Ansi::BrightCyan => "\x1b[96m",
        }
    }
}

/// Branch naming families, each with its own color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchClass {
    Main,
    Feature,
    Fix,
    Release,
    Develop,
    Other,
}

impl BranchClass {
    pub fn of(branch: &str) -> Self {
        let b = branch.to_ascii_lowercase();
        if b.starts_with("main") || b.starts_with("master") {
            BranchClass::Main
        } else if b.starts_with("feat") {
            BranchClass::Feature
        } else if b.starts_with("fix") || b.starts_with("hotfix") || b.starts_with("bugfix") {
            BranchClass::Fix
        } else if b.starts_with("release") {
            BranchClass::Release
        } else if b.starts_with("dev") {
            BranchClass::Develop
        } else {
            BranchClass::Other
        }
    }

    fn color(self) -> Ansi {
        match self {
            BranchClass::Main => Ansi::BrightGreen,
            BranchClass::Feature => Ansi::BrightBlue,
            BranchClass::Fix => Ansi::BrightRed,
            BranchClass::Release => Ansi::BrightMagenta,
            BranchClass::Develop => Ansi::BrightYellow,
            BranchClass::Other => Ansi::Cyan,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    format: OutputFormat,
    colors: bool,
}

impl Renderer {
    pub fn new(format: OutputFormat, colors: bool) -> Self {
        Self { format, colors }
    }

    /// Render the whole status line. Empty sections are left out, so an
    /// empty snapshot renders as an empty string.
    pub fn render(&self, snapshot: &StatusSnapshot) -> String {
        let mut sections = Vec::with_capacity(2);
        if !snapshot.repositories.is_empty() {
            sections.push(self.repositories_section(&snapshot.repositories));
        }
        if !snapshot.servers.is_empty() {
            sections.push(self.servers_section(&snapshot.servers));
        }

        if self.format.multiline {
            sections.join("\n")
        } else {
            sections.join(&self.format.section_separator)
        }
    }

    fn repositories_section(&self, repos: &[RepositoryStatus]) -> String {
        let segments: Vec<String> = repos.iter().map(|r| self.repository(r)).collect();
        format!("{REPOS_HEADER}{}", segments.join(&self.format.separator))
    }

    fn servers_section(&self, servers: &[DetectedServer]) -> String {
        let segments: Vec<String> = servers.iter().map(|s| self.server(s)).collect();
        format!("{SERVERS_HEADER}{}", segments.join(&self.format.separator))
    }

    /// One repository segment, e.g. `🟡API:main-3*`.
    pub fn repository(&self, status: &RepositoryStatus) -> String {
        let glyph = RepoGlyph::for_status(status);
        let name = match (&status.short_name, self.format.compact) {
            (Some(short), true) => short.as_str(),
            _ => status.name.as_str(),
        };
        let name = self.paint(Ansi::BrightCyan, &strip_control(name));

        if glyph.is_failure() {
            return format!("{}{name}:{}", glyph.symbol(), self.paint(Ansi::Dim, UNKNOWN));
        }

        let branch = strip_control(&status.branch);
        let mut out = format!(
            "{}{name}:{}",
            glyph.symbol(),
            self.paint(BranchClass::of(&branch).color(), &branch)
        );
        if status.behind > 0 && !self.format.compact {
            out.push_str(&self.paint(Ansi::Red, &format!("-{}", status.behind)));
        }
        if status.dirty && self.format.show_changes {
            out.push_str(&self.paint(Ansi::Yellow, "*"));
        }
        out
    }

    /// One server segment, e.g. `🌐Web:3000`.
    pub fn server(&self, server: &DetectedServer) -> String {
        format!(
            "{}{}:{}",
            strip_control(&server.glyph),
            self.paint(Ansi::BrightGreen, &strip_control(&server.name)),
            self.paint(Ansi::BrightYellow, &server.port.to_string())
        )
    }

    fn paint(&self, color: Ansi, text: &str) -> String {
        if self.colors {
            format!("{}{text}\x1b[0m", color.code())
        } else {
            text.to_string()
        }
    }
}

fn strip_control(s: &str) -> String {
    s.chars().filter(|c| !c.is_control()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn repo(name: &str, branch: &str, behind: usize, dirty: bool) -> RepositoryStatus {
        RepositoryStatus {
            name: name.to_string(),
            branch: branch.to_string(),
            behind,
            dirty,
            ..Default::default()
        }
    }

    fn server(name: &str, port: u16) -> DetectedServer {
        DetectedServer {
            name: name.to_string(),
            port,
            glyph: "🌐".to_string(),
        }
    }

    fn snapshot(repositories: Vec<RepositoryStatus>, servers: Vec<DetectedServer>) -> StatusSnapshot {
        StatusSnapshot {
            repositories,
            servers,
            taken_at: Local::now(),
        }
    }

    fn plain() -> Renderer {
        Renderer::new(OutputFormat::default(), false)
    }

    #[test]
    fn test_behind_and_dirty() {
        assert_eq!(plain().repository(&repo("API", "main", 3, true)), "🟡API:main-3*");
    }

    #[test]
    fn test_glyph_priority() {
        assert_eq!(RepoGlyph::for_status(&repo("A", "main", 0, false)), RepoGlyph::Clean);
        assert_eq!(RepoGlyph::for_status(&repo("A", "main", 5, false)), RepoGlyph::MinorBehind);
        assert_eq!(RepoGlyph::for_status(&repo("A", "main", 6, false)), RepoGlyph::MajorBehind);
        assert_eq!(RepoGlyph::for_status(&repo("A", "main", 9, true)), RepoGlyph::Dirty);

        let mut timed_out = repo("A", "main", 9, true);
        timed_out.outcome = ProbeOutcome::Timeout;
        assert_eq!(RepoGlyph::for_status(&timed_out), RepoGlyph::Timeout);
    }

    #[test]
    fn test_failures_render_unknown() {
        let r = plain();
        let cases = [
            (ProbeOutcome::Timeout, "⛔API:unknown"),
            (ProbeOutcome::NotARepo, "🚫API:unknown"),
            (ProbeOutcome::Error("boom".into()), "❌API:unknown"),
        ];
        for (outcome, expected) in cases {
            let status = RepositoryStatus::failed("API", outcome);
            assert_eq!(r.repository(&status), expected);
        }
    }

    #[test]
    fn test_multiline_sections() {
        let snap = snapshot(
            vec![repo("API", "main", 0, false), repo("WEB", "dev", 1, false)],
            vec![server("Web", 3000)],
        );
        assert_eq!(
            plain().render(&snap),
            "📂 Repos ▶ ✅API:main │ ⚠️WEB:dev-1\n🖥️ Servers ▶ 🌐Web:3000"
        );
    }

    #[test]
    fn test_single_line_uses_section_separator() {
        let format = OutputFormat {
            multiline: false,
            ..Default::default()
        };
        let snap = snapshot(vec![repo("API", "main", 0, false)], vec![server("Web", 3000)]);
        let out = Renderer::new(format, false).render(&snap);
        assert_eq!(out, "📂 Repos ▶ ✅API:main ┃ 🖥️ Servers ▶ 🌐Web:3000");
        assert!(!out.contains('\n'));
    }

    #[test]
    fn test_empty_sections_omitted() {
        let r = plain();
        assert_eq!(r.render(&snapshot(vec![], vec![])), "");

        let only_servers = r.render(&snapshot(vec![], vec![server("Api", 8000)]));
        assert_eq!(only_servers, "🖥️ Servers ▶ 🌐Api:8000");
    }

    #[test]
    fn test_compact_uses_short_name_and_drops_count() {
        let format = OutputFormat {
            compact: true,
            ..Default::default()
        };
        let status = repo("FRONTEND", "main", 4, true).with_short_name(Some("FE".into()));
        assert_eq!(Renderer::new(format, false).repository(&status), "🟡FE:main*");

        // Without a short name the full name stays.
        let format = OutputFormat {
            compact: true,
            ..Default::default()
        };
        assert_eq!(
            Renderer::new(format, false).repository(&repo("API", "main", 2, false)),
            "⚠️API:main"
        );
    }

    #[test]
    fn test_show_changes_off_keeps_glyph() {
        let format = OutputFormat {
            show_changes: false,
            ..Default::default()
        };
        assert_eq!(
            Renderer::new(format, false).repository(&repo("API", "main", 0, true)),
            "🟡API:main"
        );
    }

    #[test]
    fn test_colors_disabled_has_no_escape_codes() {
        let snap = snapshot(
            vec![repo("API", "feature/x", 2, true), RepositoryStatus::failed("DB", ProbeOutcome::Timeout)],
            vec![server("Web", 3000)],
        );
        assert!(!plain().render(&snap).contains('\x1b'));
    }

    #[test]
    fn test_colors_enabled() {
        let r = Renderer::new(OutputFormat::default(), true);
        let out = r.repository(&repo("API", "main", 3, true));
        assert!(out.starts_with("🟡\x1b[96mAPI\x1b[0m:\x1b[92mmain\x1b[0m"));
        assert!(out.contains("\x1b[31m-3\x1b[0m"));
        assert!(out.ends_with("\x1b[33m*\x1b[0m"));

        let out = r.server(&server("Web", 3000));
        assert_eq!(out, "🌐\x1b[92mWeb\x1b[0m:\x1b[93m3000\x1b[0m");
    }

    #[test]
    fn test_branch_classes() {
        assert_eq!(BranchClass::of("main"), BranchClass::Main);
        assert_eq!(BranchClass::of("master"), BranchClass::Main);
        assert_eq!(BranchClass::of("feature/login"), BranchClass::Feature);
        assert_eq!(BranchClass::of("feat/x"), BranchClass::Feature);
        assert_eq!(BranchClass::of("hotfix/crash"), BranchClass::Fix);
        assert_eq!(BranchClass::of("bugfix/1"), BranchClass::Fix);
        assert_eq!(BranchClass::of("fix/1"), BranchClass::Fix);
        assert_eq!(BranchClass::of("release/2.0"), BranchClass::Release);
        assert_eq!(BranchClass::of("develop"), BranchClass::Develop);
        assert_eq!(BranchClass::of("detached"), BranchClass::Other);
    }

    #[test]
    fn test_control_characters_stripped() {
        let out = plain().repository(&repo("A\nPI", "ma\x1b[31min", 0, false));
        assert_eq!(out, "✅API:ma[31min");
    }

    #[test]
    fn test_render_is_idempotent() {
        let r = Renderer::new(OutputFormat::default(), true);
        let snap = snapshot(
            vec![repo("API", "main", 7, false), repo("WEB", "fix/x", 0, true)],
            vec![server("Web", 3000), server("Api", 8000)],
        );
        assert_eq!(r.render(&snap), r.render(&snap));
    }
}
