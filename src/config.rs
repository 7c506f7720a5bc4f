use crate::context::HostEnv;
use crate::error::ConfigError;
use crate::git::Git;
use crate::identity::ProjectIdentity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const APP_DIR: &str = "cc-status-line";
pub const GLOBAL_FILE: &str = "config.yaml";
pub const PROJECTS_DIR: &str = "projects";
/// Local override file looked up in the working directory.
pub const LOCAL_FILE: &str = ".cc-status-line.yaml";

pub const DEFAULT_SEPARATOR: &str = " │ ";
pub const DEFAULT_SECTION_SEPARATOR: &str = " ┃ ";
const DEFAULT_SERVER_GLYPH: &str = "🖥️";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Single,
    Multi,
    Monolith,
    #[default]
    Custom,
}

impl ProjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectType::Single => "single",
            ProjectType::Multi => "multi",
            ProjectType::Monolith => "monolith",
            ProjectType::Custom => "custom",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    #[default]
    #[serde(alias = "repository")]
    Main,
    Submodule,
    Worktree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub name: String,
    /// Relative to the project root, or absolute.
    pub path: PathBuf,
    #[serde(rename = "type", default)]
    pub kind: RepoKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(rename = "emoji", default = "default_server_glyph")]
    pub glyph: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFormat {
    pub multiline: bool,
    pub colors: bool,
    pub compact: bool,
    pub show_changes: bool,
    /// Between entries of one section.
    pub separator: String,
    /// Between sections in single-line mode.
    pub section_separator: String,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            multiline: true,
            colors: true,
            compact: false,
            show_changes: true,
            separator: DEFAULT_SEPARATOR.to_string(),
            section_separator: DEFAULT_SECTION_SEPARATOR.to_string(),
        }
    }
}

/// Reserved flags; read and carried but not acted on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMonitoring {
    pub enabled: bool,
    pub battery: bool,
    pub cpu: bool,
    pub memory: bool,
}

/// The merged configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub root_path: PathBuf,
    pub repositories: Vec<RepositoryEntry>,
    pub servers: Vec<ServerEntry>,
    pub output_format: OutputFormat,
    pub server_templates: BTreeMap<String, ServerEntry>,
    pub system_monitoring: SystemMonitoring,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            project_type: ProjectType::default(),
            root_path: PathBuf::new(),
            repositories: Vec::new(),
            servers: Vec::new(),
            output_format: OutputFormat::default(),
            server_templates: default_server_templates(),
            system_monitoring: SystemMonitoring::default(),
        }
    }
}

impl EffectiveConfig {
    /// Built-in defaults for a project rooted at `project_root`.
    pub fn builtin(project_root: &Path) -> Self {
        let name = project_root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("project")
            .to_string();
        Self {
            name,
            root_path: project_root.to_path_buf(),
            ..Self::default()
        }
    }

    /// Absolute location of a configured repository.
    pub fn repository_path(&self, entry: &RepositoryEntry) -> PathBuf {
        let home = dirs::home_dir().unwrap_or_default();
        let path = expand_home(entry.path.clone(), &home);
        if path.is_absolute() {
            path
        } else {
            self.root_path.join(path)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty() && self.servers.is_empty()
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Overlay one layer. Present fields replace, lists are replaced
    /// wholesale, nested option blocks merge per field.
    pub fn apply(&mut self, layer: ConfigLayer, scope: Layer) {
        if let Some(name) = layer.name {
            self.name = name;
        }
        if let Some(project_type) = layer.project_type {
            self.project_type = project_type;
        }
        if let Some(root) = layer.root_path {
            let home = dirs::home_dir().unwrap_or_default();
            let root = expand_home(root, &home);
            self.root_path = if root.is_absolute() {
                root
            } else {
                self.root_path.join(root)
            };
        }
        if let Some(repositories) = layer.repositories {
            self.repositories = repositories;
        }
        if let Some(servers) = layer.servers {
            self.servers = servers;
        }
        if let Some(format) = layer.output_format {
            format.apply_to(&mut self.output_format);
        }

        if scope == Layer::Global {
            if let Some(templates) = layer.server_templates {
                self.server_templates.extend(templates);
            }
            if let Some(monitoring) = layer.system_monitoring {
                monitoring.apply_to(&mut self.system_monitoring);
            }
        } else if layer.server_templates.is_some() || layer.system_monitoring.is_some() {
            debug!(layer = %scope, "ignoring global-only keys");
        }
    }

    /// Drop repositories whose name repeats an earlier one.
    fn dedup_repositories(&mut self) {
        let mut seen = HashSet::new();
        self.repositories.retain(|repo| {
            if seen.insert(repo.name.clone()) {
                true
            } else {
                warn!(repo = %repo.name, "duplicate repository name, keeping the first");
                false
            }
        });
    }
}

fn default_true() -> bool {
    true
}

fn default_server_glyph() -> String {
    DEFAULT_SERVER_GLYPH.to_string()
}

pub(crate) fn template(name: &str, ports: &[u16], glyph: &str, patterns: &[&str]) -> ServerEntry {
    ServerEntry {
        name: name.to_string(),
        ports: ports.to_vec(),
        glyph: glyph.to_string(),
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        enabled: true,
    }
}

pub fn default_server_templates() -> BTreeMap<String, ServerEntry> {
    BTreeMap::from([
        (
            "web".to_string(),
            template("Web", &[3000, 8000, 8080], "🌐", &["index.html", "package.json"]),
        ),
        (
            "api".to_string(),
            template(
                "API",
                &[8000, 5000, 3001],
                "🔌",
                &["server.py", "app.py", "main.py"],
            ),
        ),
        (
            "flask".to_string(),
            template(
                "Flask",
                &[5000, 5001, 8000],
                "🌶️",
                &["app.py", "wsgi.py", "application.py", "requirements.txt"],
            ),
        ),
        (
            "database".to_string(),
            template(
                "Database",
                &[5432, 3306, 27017],
                "🗄️",
                &["docker-compose.yml"],
            ),
        ),
    ])
}

// ─── on-disk layers ─────────────────────────────────────────────────────────

/// `output_format` as written in a layer: every field optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputFormatLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colors: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compact: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_changes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_separator: Option<String>,
}

impl OutputFormatLayer {
    fn apply_to(self, format: &mut OutputFormat) {
        if let Some(v) = self.multiline {
            format.multiline = v;
        }
        if let Some(v) = self.colors {
            format.colors = v;
        }
        if let Some(v) = self.compact {
            format.compact = v;
        }
        if let Some(v) = self.show_changes {
            format.show_changes = v;
        }
        if let Some(v) = self.separator {
            format.separator = v;
        }
        if let Some(v) = self.section_separator {
            format.section_separator = v;
        }
    }
}

impl From<&OutputFormat> for OutputFormatLayer {
    fn from(format: &OutputFormat) -> Self {
        Self {
            multiline: Some(format.multiline),
            colors: Some(format.colors),
            compact: Some(format.compact),
            show_changes: Some(format.show_changes),
            separator: Some(format.separator.clone()),
            section_separator: Some(format.section_separator.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemMonitoringLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<bool>,
}

impl SystemMonitoringLayer {
    fn apply_to(self, monitoring: &mut SystemMonitoring) {
        if let Some(v) = self.enabled {
            monitoring.enabled = v;
        }
        if let Some(v) = self.battery {
            monitoring.battery = v;
        }
        if let Some(v) = self.cpu {
            monitoring.cpu = v;
        }
        if let Some(v) = self.memory {
            monitoring.memory = v;
        }
    }
}

/// One YAML file. Absent keys leave the lower layer untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub project_type: Option<ProjectType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repositories: Option<Vec<RepositoryEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<ServerEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormatLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_templates: Option<BTreeMap<String, ServerEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_monitoring: Option<SystemMonitoringLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ConfigLayer {
    /// A complete layer describing `config`, as written for `scope`.
    pub fn from_config(config: &EffectiveConfig, scope: Layer) -> Self {
        let global = scope == Layer::Global;
        Self {
            name: Some(config.name.clone()),
            project_type: Some(config.project_type),
            root_path: Some(config.root_path.clone()),
            repositories: Some(config.repositories.clone()),
            servers: Some(config.servers.clone()),
            output_format: Some(OutputFormatLayer::from(&config.output_format)),
            server_templates: global.then(|| config.server_templates.clone()),
            system_monitoring: global.then(|| SystemMonitoringLayer {
                enabled: Some(config.system_monitoring.enabled),
                battery: Some(config.system_monitoring.battery),
                cpu: Some(config.system_monitoring.cpu),
                memory: Some(config.system_monitoring.memory),
            }),
            updated_at: (scope == Layer::Project)
                .then(|| chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Global,
    Project,
    Local,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layer::Global => "global",
            Layer::Project => "project",
            Layer::Local => "local",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerState {
    Missing,
    Loaded,
    /// Present but unreadable or malformed; the reason is kept for display.
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct LayerReport {
    pub layer: Layer,
    pub path: PathBuf,
    pub state: LayerState,
}

/// Result of one resolution pass.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub config: EffectiveConfig,
    pub identity: ProjectIdentity,
    pub project_root: PathBuf,
    pub layers: Vec<LayerReport>,
}

/// Summary of one `projects/*.yaml` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    pub id: String,
    pub name: Option<String>,
    pub project_type: Option<ProjectType>,
    pub root_path: Option<PathBuf>,
}

// ─── locations ──────────────────────────────────────────────────────────────

/// Config root: CLI override, then `CCSL_CONFIG_DIR`, then
/// `$XDG_CONFIG_HOME/cc-status-line`, then the platform default.
pub fn config_root(override_dir: Option<&Path>, env: &HostEnv) -> PathBuf {
    let home = env.home_dir.clone().unwrap_or_default();
    if let Some(dir) = override_dir {
        return expand_home(dir.to_path_buf(), &home);
    }
    if let Some(dir) = &env.config_dir {
        return expand_home(dir.clone(), &home);
    }
    if let Some(xdg) = &env.xdg_config_home {
        return xdg.join(APP_DIR);
    }
    platform_config_root(env, &home)
}

#[cfg(windows)]
fn platform_config_root(env: &HostEnv, home: &Path) -> PathBuf {
    env.app_data_dir
        .clone()
        .unwrap_or_else(|| home.join("AppData").join("Roaming"))
        .join(APP_DIR)
}

#[cfg(not(windows))]
fn platform_config_root(_env: &HostEnv, home: &Path) -> PathBuf {
    home.join(".config").join(APP_DIR)
}

/// Nearest ancestor of `start` holding a `.git` entry, or `start` itself.
pub fn find_project_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .unwrap_or(start)
        .to_path_buf()
}

/// Expand `~` and `$HOME` prefixes to the actual home directory.
fn expand_home(path: PathBuf, home: &Path) -> PathBuf {
    let s = path.to_string_lossy();

    if let Some(stripped) = s.strip_prefix("~/") {
        return home.join(stripped);
    }
    if s == "~" {
        return home.to_path_buf();
    }
    if let Some(stripped) = s.strip_prefix("$HOME/") {
        return home.join(stripped);
    }
    if s == "$HOME" {
        return home.to_path_buf();
    }

    path
}

// ─── resolver ───────────────────────────────────────────────────────────────

/// Owns every read and write of the configuration layers.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    root: PathBuf,
    git: Git,
}

impl ConfigResolver {
    pub fn new(root: PathBuf, git: Git) -> Self {
        Self { root, git }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn global_path(&self) -> PathBuf {
        self.root.join(GLOBAL_FILE)
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join(PROJECTS_DIR)
    }

    pub fn project_path(&self, identity: &ProjectIdentity) -> PathBuf {
        self.projects_dir().join(identity.file_name())
    }

    /// The working directory's override file, or the project root's when the
    /// working directory has none.
    pub fn local_path(&self, workdir: &Path, project_root: &Path) -> PathBuf {
        let here = workdir.join(LOCAL_FILE);
        if here.exists() {
            here
        } else {
            project_root.join(LOCAL_FILE)
        }
    }

    /// Parse one layer file. `Ok(None)` when the file does not exist.
    pub fn load_layer(&self, path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(Some(ConfigLayer::default()));
        }
        serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Merge defaults, global, project and local layers for `workdir`.
    ///
    /// Malformed layers are skipped with a warning and reported in
    /// [`Resolution::layers`].
    pub async fn resolve(&self, workdir: &Path) -> Resolution {
        let project_root = find_project_root(workdir);
        let identity = ProjectIdentity::derive(&self.git, &project_root).await;
        debug!(project = %identity, root = %project_root.display(), "resolving configuration");

        let mut config = EffectiveConfig::builtin(&project_root);
        let sources = [
            (Layer::Global, self.global_path()),
            (Layer::Project, self.project_path(&identity)),
            (Layer::Local, self.local_path(workdir, &project_root)),
        ];

        let mut layers = Vec::with_capacity(sources.len());
        for (layer, path) in sources {
            let state = match self.load_layer(&path) {
                Ok(None) => LayerState::Missing,
                Ok(Some(contents)) => {
                    config.apply(contents, layer);
                    LayerState::Loaded
                }
                Err(err) => {
                    warn!(layer = %layer, error = %err, "skipping configuration layer");
                    LayerState::Skipped(err.to_string())
                }
            };
            layers.push(LayerReport { layer, path, state });
        }
        config.dedup_repositories();

        Resolution {
            config,
            identity,
            project_root,
            layers,
        }
    }

    /// Defaults plus the global layer only.
    pub fn global_config(&self) -> Result<EffectiveConfig, ConfigError> {
        let mut config = EffectiveConfig::default();
        if let Some(layer) = self.load_layer(&self.global_path())? {
            config.apply(layer, Layer::Global);
        }
        Ok(config)
    }

    /// Write `config` as the given layer, creating directories as needed.
    /// Returns the path written.
    pub fn write(
        &self,
        layer: Layer,
        config: &EffectiveConfig,
        identity: &ProjectIdentity,
    ) -> Result<PathBuf, ConfigError> {
        let path = match layer {
            Layer::Global => self.global_path(),
            Layer::Project => self.project_path(identity),
            Layer::Local => config.root_path.join(LOCAL_FILE),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let yaml = serde_yaml::to_string(&ConfigLayer::from_config(config, layer))?;
        std::fs::write(&path, yaml).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(layer = %layer, path = %path.display(), "configuration written");
        Ok(path)
    }

    /// Remove the project file. `Ok(false)` when there was nothing to remove.
    pub fn delete_project(&self, identity: &ProjectIdentity) -> Result<bool, ConfigError> {
        let path = self.project_path(identity);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).map_err(|source| ConfigError::Write { path, source })?;
        Ok(true)
    }

    /// Every readable project file, sorted by id. Malformed files are skipped.
    pub fn list_projects(&self) -> Vec<ProjectSummary> {
        let entries = match std::fs::read_dir(self.projects_dir()) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        let mut projects: Vec<ProjectSummary> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("yaml"))
            .filter_map(|path| {
                let id = path.file_stem()?.to_str()?.to_string();
                match self.load_layer(&path) {
                    Ok(Some(layer)) => Some(ProjectSummary {
                        id,
                        name: layer.name,
                        project_type: layer.project_type,
                        root_path: layer.root_path,
                    }),
                    Ok(None) => None,
                    Err(err) => {
                        warn!(error = %err, "skipping project file");
                        None
                    }
                }
            })
            .collect();
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        projects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver(root: &Path) -> ConfigResolver {
        ConfigResolver::new(root.to_path_buf(), Git::default())
    }

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_default_config() {
        let cfg = EffectiveConfig::default();
        assert!(cfg.output_format.multiline);
        assert!(cfg.output_format.colors);
        assert!(!cfg.output_format.compact);
        assert!(cfg.output_format.show_changes);
        assert!(cfg.repositories.is_empty());
        assert!(cfg.server_templates.contains_key("flask"));
        assert!(!cfg.system_monitoring.enabled);
        assert_eq!(cfg.project_type, ProjectType::Custom);
    }

    #[test]
    fn test_builtin_takes_name_from_root() {
        let cfg = EffectiveConfig::builtin(Path::new("/work/shop"));
        assert_eq!(cfg.name, "shop");
        assert_eq!(cfg.root_path, PathBuf::from("/work/shop"));
    }

    #[test]
    fn test_load_layer_missing_file() {
        let tmp = TempDir::new().unwrap();
        let layer = resolver(tmp.path())
            .load_layer(&tmp.path().join("nope.yaml"))
            .unwrap();
        assert!(layer.is_none());
    }

    #[test]
    fn test_load_layer_partial_yaml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        write(&path, "output_format:\n  compact: true\n");
        let layer = resolver(tmp.path()).load_layer(&path).unwrap().unwrap();
        assert_eq!(layer.output_format.unwrap().compact, Some(true));
        assert!(layer.repositories.is_none());
    }

    #[test]
    fn test_load_layer_empty_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        write(&path, "\n");
        let layer = resolver(tmp.path()).load_layer(&path).unwrap();
        assert_eq!(layer, Some(ConfigLayer::default()));
    }

    #[test]
    fn test_load_layer_malformed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        write(&path, "repositories: [unclosed\n");
        let err = resolver(tmp.path()).load_layer(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        write(&path, "- just\n- a list\n");
        assert!(resolver(tmp.path()).load_layer(&path).is_err());
    }

    #[test]
    fn test_repository_kind_accepts_legacy_value() {
        let layer: ConfigLayer = serde_yaml::from_str(
            "repositories:\n  - {name: API, path: api, type: repository}\n  - {name: LIB, path: lib, type: submodule}\n",
        )
        .unwrap();
        let repos = layer.repositories.unwrap();
        assert_eq!(repos[0].kind, RepoKind::Main);
        assert_eq!(repos[1].kind, RepoKind::Submodule);
    }

    #[test]
    fn test_server_defaults() {
        let layer: ConfigLayer =
            serde_yaml::from_str("servers:\n  - name: Vite\n    ports: [5173]\n").unwrap();
        let server = &layer.servers.unwrap()[0];
        assert!(server.enabled);
        assert!(server.patterns.is_empty());
        assert_eq!(server.glyph, DEFAULT_SERVER_GLYPH);
    }

    #[test]
    fn test_output_format_override_is_per_field() {
        let mut cfg = EffectiveConfig::default();
        cfg.apply(
            serde_yaml::from_str("output_format: {colors: true, compact: true}\nname: shop\n")
                .unwrap(),
            Layer::Global,
        );
        let global = cfg.clone();
        cfg.apply(
            serde_yaml::from_str("output_format: {colors: false}\n").unwrap(),
            Layer::Local,
        );
        assert!(!cfg.output_format.colors);
        let mut expected = global;
        expected.output_format.colors = false;
        assert_eq!(cfg, expected);
    }

    #[test]
    fn test_lists_are_replaced_wholesale() {
        let mut cfg = EffectiveConfig::default();
        cfg.apply(
            serde_yaml::from_str(
                "repositories:\n  - {name: A, path: a}\n  - {name: B, path: b}\n",
            )
            .unwrap(),
            Layer::Global,
        );
        cfg.apply(
            serde_yaml::from_str("repositories:\n  - {name: C, path: c}\n").unwrap(),
            Layer::Project,
        );
        let names: Vec<&str> = cfg.repositories.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["C"]);
    }

    #[test]
    fn test_templates_merge_from_global_only() {
        let mut cfg = EffectiveConfig::default();
        cfg.apply(
            serde_yaml::from_str("server_templates:\n  vite: {name: Vite, ports: [5173]}\n")
                .unwrap(),
            Layer::Global,
        );
        assert!(cfg.server_templates.contains_key("vite"));
        assert!(cfg.server_templates.contains_key("web"));

        cfg.apply(
            serde_yaml::from_str("server_templates:\n  rails: {name: Rails, ports: [3000]}\n")
                .unwrap(),
            Layer::Project,
        );
        assert!(!cfg.server_templates.contains_key("rails"));
    }

    #[test]
    fn test_duplicate_repository_names_dropped() {
        let mut cfg = EffectiveConfig::default();
        cfg.apply(
            serde_yaml::from_str(
                "repositories:\n  - {name: A, path: a}\n  - {name: A, path: other}\n",
            )
            .unwrap(),
            Layer::Global,
        );
        cfg.dedup_repositories();
        assert_eq!(cfg.repositories.len(), 1);
        assert_eq!(cfg.repositories[0].path, PathBuf::from("a"));
    }

    #[test]
    fn test_repository_path_relative_and_absolute() {
        let cfg = EffectiveConfig::builtin(Path::new("/work/shop"));
        let rel = RepositoryEntry {
            name: "API".into(),
            path: PathBuf::from("api"),
            kind: RepoKind::Main,
            short_name: None,
        };
        let abs = RepositoryEntry {
            path: PathBuf::from("/elsewhere/lib"),
            ..rel.clone()
        };
        assert_eq!(cfg.repository_path(&rel), PathBuf::from("/work/shop/api"));
        assert_eq!(cfg.repository_path(&abs), PathBuf::from("/elsewhere/lib"));
    }

    #[test]
    fn test_config_root_precedence() {
        let env = HostEnv {
            config_dir: Some(PathBuf::from("/env/ccsl")),
            xdg_config_home: Some(PathBuf::from("/xdg")),
            home_dir: Some(PathBuf::from("/home/user")),
            ..HostEnv::default()
        };
        assert_eq!(
            config_root(Some(Path::new("~/custom")), &env),
            PathBuf::from("/home/user/custom")
        );
        assert_eq!(config_root(None, &env), PathBuf::from("/env/ccsl"));

        let env = HostEnv {
            config_dir: None,
            ..env
        };
        assert_eq!(config_root(None, &env), PathBuf::from("/xdg/cc-status-line"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_config_root_platform_default() {
        let env = HostEnv {
            home_dir: Some(PathBuf::from("/home/user")),
            ..HostEnv::default()
        };
        assert_eq!(
            config_root(None, &env),
            PathBuf::from("/home/user/.config/cc-status-line")
        );
    }

    #[test]
    fn test_expand_home_tilde() {
        let home = PathBuf::from("/home/user");
        let p = expand_home(PathBuf::from("~/Projects"), &home);
        assert_eq!(p, PathBuf::from("/home/user/Projects"));
    }

    #[test]
    fn test_expand_home_dollar() {
        let home = PathBuf::from("/home/user");
        let p = expand_home(PathBuf::from("$HOME/code"), &home);
        assert_eq!(p, PathBuf::from("/home/user/code"));
    }

    #[test]
    fn test_find_project_root_walks_up() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        let nested = tmp.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested), tmp.path());
    }

    #[tokio::test]
    async fn test_resolve_layers_in_priority_order() {
        let cfg_root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let r = resolver(cfg_root.path());

        write(
            &r.global_path(),
            "name: global\noutput_format: {colors: true, multiline: false}\nrepositories:\n  - {name: G, path: g}\n",
        );
        let identity = ProjectIdentity::from_path(work.path());
        write(&r.project_path(&identity), "name: project\n");
        write(
            &work.path().join(LOCAL_FILE),
            "output_format: {colors: false}\n",
        );

        let res = r.resolve(work.path()).await;
        assert_eq!(res.identity.slug(), identity.slug());
        assert_eq!(res.config.name, "project");
        assert!(!res.config.output_format.colors);
        assert!(!res.config.output_format.multiline);
        assert_eq!(res.config.repositories[0].name, "G");
        assert!(res.layers.iter().all(|l| l.state == LayerState::Loaded));
    }

    #[tokio::test]
    async fn test_resolve_skips_malformed_layer() {
        let cfg_root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let r = resolver(cfg_root.path());

        write(&r.global_path(), "name: global\n");
        let identity = ProjectIdentity::from_path(work.path());
        write(&r.project_path(&identity), "name: [broken\n");

        let res = r.resolve(work.path()).await;
        assert_eq!(res.config.name, "global");
        let project = res
            .layers
            .iter()
            .find(|l| l.layer == Layer::Project)
            .unwrap();
        assert!(matches!(project.state, LayerState::Skipped(_)));
        let local = res.layers.iter().find(|l| l.layer == Layer::Local).unwrap();
        assert_eq!(local.state, LayerState::Missing);
    }

    #[tokio::test]
    async fn test_resolve_with_nothing_on_disk_uses_defaults() {
        let cfg_root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let res = resolver(cfg_root.path()).resolve(work.path()).await;
        assert!(res.config.is_empty());
        assert_eq!(res.config.output_format, OutputFormat::default());
        assert_eq!(res.project_root, work.path());
    }

    #[tokio::test]
    async fn test_write_project_then_resolve() {
        let cfg_root = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let r = resolver(cfg_root.path());
        let identity = ProjectIdentity::from_path(work.path());

        let mut cfg = EffectiveConfig::builtin(work.path());
        cfg.project_type = ProjectType::Single;
        cfg.repositories.push(RepositoryEntry {
            name: "APP".into(),
            path: PathBuf::from("."),
            kind: RepoKind::Main,
            short_name: Some("A".into()),
        });
        let path = r.write(Layer::Project, &cfg, &identity).unwrap();
        assert_eq!(path, r.project_path(&identity));

        let written = r.load_layer(&path).unwrap().unwrap();
        assert!(written.updated_at.is_some());
        assert!(written.server_templates.is_none());

        let res = r.resolve(work.path()).await;
        assert_eq!(res.config.project_type, ProjectType::Single);
        assert_eq!(res.config.repositories, cfg.repositories);
    }

    #[test]
    fn test_list_and_delete_projects() {
        let cfg_root = TempDir::new().unwrap();
        let r = resolver(cfg_root.path());
        assert!(r.list_projects().is_empty());

        write(
            &r.projects_dir().join("b-proj.yaml"),
            "name: Beta\ntype: multi\n",
        );
        write(&r.projects_dir().join("a-proj.yaml"), "name: Alpha\n");
        write(&r.projects_dir().join("broken.yaml"), "name: [\n");
        write(&r.projects_dir().join("notes.txt"), "ignored");

        let projects = r.list_projects();
        let ids: Vec<&str> = projects.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a-proj", "b-proj"]);
        assert_eq!(projects[1].project_type, Some(ProjectType::Multi));

        let identity = ProjectIdentity::from_remote_url("a-proj").unwrap();
        assert!(r.delete_project(&identity).unwrap());
        assert!(!r.delete_project(&identity).unwrap());
    }

    #[test]
    fn test_global_config_reads_only_global() {
        let cfg_root = TempDir::new().unwrap();
        let r = resolver(cfg_root.path());
        write(&r.global_path(), "system_monitoring: {enabled: true}\n");
        let cfg = r.global_config().unwrap();
        assert!(cfg.system_monitoring.enabled);
        assert!(!cfg.system_monitoring.cpu);
    }
}
