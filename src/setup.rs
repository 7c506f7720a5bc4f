use crate::config::{
    template, ConfigResolver, EffectiveConfig, Layer, ProjectType, RepoKind, RepositoryEntry,
    Resolution, ServerEntry,
};
use crate::detection::patterns_match;
use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// More submodules than this makes a repository a monolith.
const MONOLITH_MIN_SUBMODULES: usize = 2;

/// Inspects a project directory to suggest a starting configuration.
#[derive(Debug, Clone)]
pub struct ProjectDetector {
    root: PathBuf,
}

impl ProjectDetector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn detect_project_type(&self) -> ProjectType {
        if self.root.join(".gitmodules").exists()
            && self.submodules().len() > MONOLITH_MIN_SUBMODULES
        {
            ProjectType::Monolith
        } else if self.child_repositories().len() > 1 {
            ProjectType::Multi
        } else if self.root.join(".git").exists() {
            ProjectType::Single
        } else {
            ProjectType::Custom
        }
    }

    /// Paths listed in `.gitmodules`, in file order.
    pub fn submodules(&self) -> Vec<String> {
        let Ok(contents) = std::fs::read_to_string(self.root.join(".gitmodules")) else {
            return Vec::new();
        };
        contents
            .lines()
            .filter_map(|line| {
                let (key, value) = line.trim().split_once('=')?;
                (key.trim() == "path").then(|| value.trim().to_string())
            })
            .filter(|path| !path.is_empty())
            .collect()
    }

    /// Immediate subdirectories holding a `.git` entry, sorted by name.
    fn child_repositories(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut repos: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.join(".git").exists())
            .collect();
        repos.sort();
        repos
    }

    pub fn suggest_repositories(&self, project_type: ProjectType) -> Vec<RepositoryEntry> {
        match project_type {
            ProjectType::Monolith => {
                let mut repos = vec![entry("MAIN", PathBuf::from("."), RepoKind::Main)];
                repos.extend(self.submodules().into_iter().map(|sub| {
                    let path = PathBuf::from(&sub);
                    entry(&upper_name(&path), path, RepoKind::Submodule)
                }));
                repos
            }
            ProjectType::Multi => self
                .child_repositories()
                .into_iter()
                .filter_map(|path| {
                    let rel = path.strip_prefix(&self.root).ok()?.to_path_buf();
                    Some(entry(&upper_name(&path), rel, RepoKind::Main))
                })
                .collect(),
            ProjectType::Single => {
                vec![entry(&upper_name(&self.root), PathBuf::from("."), RepoKind::Main)]
            }
            ProjectType::Custom => Vec::new(),
        }
    }

    /// Templates first, then the built-in suggestions, keeping those whose
    /// patterns match the project root. Names are unique.
    pub fn suggest_servers(&self, templates: &BTreeMap<String, ServerEntry>) -> Vec<ServerEntry> {
        let mut seen = HashSet::new();
        templates
            .values()
            .cloned()
            .chain(builtin_suggestions())
            .filter(|s| patterns_match(&self.root, &s.patterns))
            .filter(|s| seen.insert(s.name.to_ascii_lowercase()))
            .collect()
    }
}

fn entry(name: &str, path: PathBuf, kind: RepoKind) -> RepositoryEntry {
    RepositoryEntry {
        name: name.to_string(),
        path,
        kind,
        short_name: None,
    }
}

fn upper_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_uppercase())
        .unwrap_or_else(|| "MAIN".to_string())
}

/// Common development servers recognised by the files they leave behind.
pub fn builtin_suggestions() -> Vec<ServerEntry> {
    vec![
        template(
            "Flask",
            &[5000, 5001, 8000],
            "🌶️",
            &["app.py", "wsgi.py", "application.py", "requirements.txt"],
        ),
        template(
            "Python",
            &[8000, 5000],
            "🐍",
            &["*.py", "requirements.txt", "pyproject.toml"],
        ),
        template("Node", &[3000, 8080], "🟢", &["package.json", "node_modules/"]),
        template("Web", &[8080, 3000, 5173], "🌐", &["index.html", "*.css", "*.js"]),
        template(
            "Docker",
            &[80, 443, 8080],
            "🐳",
            &["docker-compose.yml", "Dockerfile"],
        ),
        template("Database", &[5432, 3306, 27017], "🗄️", &["*.sql", "migrations/"]),
    ]
}

/// `base` with name, type, root, repositories and servers filled in from
/// what is found under `root`. Output format and templates carry over.
pub fn generate_config(base: &EffectiveConfig, root: &Path) -> EffectiveConfig {
    let detector = ProjectDetector::new(root);
    let project_type = detector.detect_project_type();
    debug!(project_type = %project_type, root = %root.display(), "detected project type");

    let mut config = base.clone();
    config.name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    config.project_type = project_type;
    config.root_path = root.to_path_buf();
    config.repositories = detector.suggest_repositories(project_type);
    config.servers = detector.suggest_servers(&base.server_templates);
    config
}

/// Detect the project, write its project-scoped config and print a summary.
pub fn run_init(resolver: &ConfigResolver, resolution: &Resolution) -> Result<EffectiveConfig> {
    println!();
    println!("  🔧 cc-status-line setup");
    println!("  Analyzing {}", resolution.project_root.display());
    println!();

    let config = generate_config(&resolution.config, &resolution.project_root);
    let path = resolver.write(Layer::Project, &config, &resolution.identity)?;

    println!("  Project type: {}", config.project_type);
    if config.repositories.is_empty() {
        println!("  No repositories detected.");
    } else {
        println!("  Repositories:");
        for repo in &config.repositories {
            println!("    • {} ({})", repo.name, repo.path.display());
        }
    }
    if !config.servers.is_empty() {
        println!("  Servers:");
        for server in &config.servers {
            let ports: Vec<String> = server.ports.iter().map(u16::to_string).collect();
            println!("    • {}{} [{}]", server.glyph, server.name, ports.join(", "));
        }
    }
    println!();
    println!("  ✅ Configuration saved for project: {}", config.name);
    println!("  📁 Project ID: {}", resolution.identity);
    println!("  Saved to {}", path.display());
    println!("  Tip: run `cc-status-line --config` to review the merged result.");
    println!();

    Ok(config)
}
