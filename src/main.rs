use anyhow::Result;
use cc_status_line::config::{self, ConfigResolver, LayerState, Resolution};
use cc_status_line::context::{HostEnv, RunContext};
use cc_status_line::detection::ServerDetector;
use cc_status_line::git::{Git, RepositoryProbe};
use cc_status_line::host::{self, HostPayload};
use cc_status_line::logging::{self, LogSettings, DEBUG_ENV, LOG_FILE_ENV, LOG_LEVEL_ENV};
use cc_status_line::monitor::StatusAggregator;
use cc_status_line::render::Renderer;
use cc_status_line::setup;
use clap::{ArgGroup, Parser};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

const NO_CONFIG_HINT: &str = "❌ No configuration - Run 'cc-status-line --init'";

#[derive(Parser, Debug)]
#[command(
    name = "cc-status-line",
    version,
    about = "Status line showing git repository health and running dev servers"
)]
#[command(group(
    ArgGroup::new("mode")
        .args(["init", "config", "config_info", "list_projects", "global_config", "reset"])
        .multiple(false)
))]
struct Cli {
    /// Configuration directory (default: $CCSL_CONFIG_DIR, then ~/.config/cc-status-line)
    #[arg(long, value_name = "PATH")]
    config_dir: Option<PathBuf>,

    /// Detect the current project and write its configuration
    #[arg(long, visible_alias = "setup")]
    init: bool,

    /// Print the merged configuration for the current project
    #[arg(long)]
    config: bool,

    /// Show where each configuration layer comes from
    #[arg(long)]
    config_info: bool,

    /// List configured projects
    #[arg(long)]
    list_projects: bool,

    /// Print the global configuration
    #[arg(long)]
    global_config: bool,

    /// Delete the current project's configuration
    #[arg(long)]
    reset: bool,

    /// Timeout for each git query, in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Render whatever is ready after this many milliseconds
    #[arg(long, value_name = "MS")]
    deadline_ms: Option<u64>,
}

impl Cli {
    fn renders_status(&self) -> bool {
        !(self.init
            || self.config
            || self.config_info
            || self.list_projects
            || self.global_config
            || self.reset)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LogSettings::from_process());

    let env = HostEnv::from_process();
    let mut ctx = RunContext::new(config::config_root(cli.config_dir.as_deref(), &env), &env);
    if let Some(ms) = cli.timeout_ms {
        ctx = ctx.with_git_timeout(Duration::from_millis(ms.max(1)));
    }
    let resolver = ConfigResolver::new(ctx.config_root.clone(), Git::new(ctx.git_timeout));

    if cli.list_projects {
        print_projects(&resolver);
        return Ok(());
    }
    if cli.global_config {
        let global = resolver.global_config()?;
        println!("🌍 Global Configuration ({})", resolver.global_path().display());
        println!("{}", "=".repeat(50));
        print!("{}", global.to_yaml()?);
        return Ok(());
    }

    // Only the status line is driven by a host that pipes its payload in.
    let payload = if cli.renders_status() {
        HostPayload::read_stdin()
    } else {
        None
    };
    let workdir = host::resolve_workdir(payload.as_ref());
    let resolution = resolver.resolve(&workdir).await;

    if cli.init {
        setup::run_init(&resolver, &resolution)?;
        return Ok(());
    }
    if cli.config {
        println!("📋 Current Configuration ({})", resolution.identity);
        println!("{}", "=".repeat(50));
        print!("{}", resolution.config.to_yaml()?);
        return Ok(());
    }
    if cli.config_info {
        print_config_info(&ctx, &resolution);
        return Ok(());
    }
    if cli.reset {
        if resolver.delete_project(&resolution.identity)? {
            println!("🗑️ Removed configuration for project: {}", resolution.identity);
        } else {
            println!("No configuration stored for project: {}", resolution.identity);
        }
        return Ok(());
    }

    print_status_line(&ctx, &resolution, cli.deadline_ms).await
}

async fn print_status_line(
    ctx: &RunContext,
    resolution: &Resolution,
    deadline_ms: Option<u64>,
) -> Result<()> {
    let config = &resolution.config;
    if config.is_empty() {
        writeln!(io::stdout(), "{NO_CONFIG_HINT}")?;
        return Ok(());
    }

    let aggregator = StatusAggregator::new(
        RepositoryProbe::new(Git::new(ctx.git_timeout)),
        ServerDetector::for_platform(config.root_path.clone())
            .with_timeout(ctx.port_timeout),
    );
    let snapshot = match deadline_ms {
        Some(ms) => {
            let deadline = tokio::time::sleep(Duration::from_millis(ms));
            aggregator
                .aggregate_until(config, ctx.clock.as_ref(), deadline)
                .await
        }
        None => aggregator.aggregate(config, ctx.clock.as_ref()).await,
    };

    let renderer = Renderer::new(
        config.output_format.clone(),
        ctx.colors_enabled(&config.output_format),
    );
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", renderer.render(&snapshot))?;
    stdout.flush()?;
    Ok(())
}

fn print_config_info(ctx: &RunContext, resolution: &Resolution) {
    println!("📁 Project ID:   {}", resolution.identity);
    println!("📂 Project root: {}", resolution.project_root.display());
    println!("⚙️  Config dir:   {}", ctx.config_root.display());
    println!();
    println!("Layers (lowest first):");
    println!("  {:<8}  {:<8}  {}", "default", "built-in", "-");
    for report in &resolution.layers {
        let state = match &report.state {
            LayerState::Missing => "missing".to_string(),
            LayerState::Loaded => "loaded".to_string(),
            LayerState::Skipped(reason) => format!("skipped ({reason})"),
        };
        println!(
            "  {:<8}  {:<8}  {}",
            report.layer.to_string(),
            state,
            report.path.display()
        );
    }
    println!();
    println!("Environment:");
    for key in [
        "CCSL_CONFIG_DIR",
        "XDG_CONFIG_HOME",
        "NO_COLOR",
        LOG_LEVEL_ENV,
        LOG_FILE_ENV,
        DEBUG_ENV,
    ] {
        let value = std::env::var(key).unwrap_or_else(|_| "(unset)".to_string());
        println!("  {key}={value}");
    }
}

fn print_projects(resolver: &ConfigResolver) {
    let projects = resolver.list_projects();
    if projects.is_empty() {
        println!("No projects configured. Run `cc-status-line --init` inside a project.");
        return;
    }

    let id_w = projects.iter().map(|p| p.id.len()).max().unwrap_or(2).max(2);
    let name_w = projects
        .iter()
        .map(|p| p.name.as_deref().map_or(1, str::len))
        .max()
        .unwrap_or(4)
        .max(4);

    println!("{:<iw$}  {:<nw$}  {:<8}  ROOT", "ID", "NAME", "TYPE", iw = id_w, nw = name_w);
    for project in &projects {
        println!(
            "{:<iw$}  {:<nw$}  {:<8}  {}",
            project.id,
            project.name.as_deref().unwrap_or("-"),
            project.project_type.map_or("-", |t| t.as_str()),
            project
                .root_path
                .as_ref()
                .map_or_else(|| "-".to_string(), |p| p.display().to_string()),
            iw = id_w,
            nw = name_w,
        );
    }
}
