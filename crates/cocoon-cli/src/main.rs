//! CLI binary for validating, inspecting and running Cocoon sitemaps.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cocoon_components::{ComponentManager, FileSourceResolver};
use cocoon_sitemap::{
    validate, ProcessorConfig, Severity, SitemapConfig, SitemapServices, TreeProcessor,
};
use cocoon_types::Environment;

#[derive(Parser)]
#[command(name = "cocoon", version, about = "Sitemap tree processor for XML publishing pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Lint a sitemap descriptor
    Validate {
        /// Path to the sitemap .json file
        sitemap: PathBuf,
    },

    /// Show what a sitemap declares
    Info {
        /// Path to the sitemap .json file
        sitemap: PathBuf,
    },

    /// Process one request and write the response body to stdout
    Process {
        /// Path to the sitemap .json file
        sitemap: PathBuf,

        /// Request URI, optionally with a query string
        uri: String,

        /// Request parameter (repeatable)
        #[arg(long = "param", value_name = "K=V", value_parser = parse_pair)]
        params: Vec<(String, String)>,

        /// Request header (repeatable)
        #[arg(long = "header", value_name = "K=V", value_parser = parse_pair)]
        headers: Vec<(String, String)>,

        /// View to render instead of the full pipeline
        #[arg(long)]
        view: Option<String>,

        /// Print the lifecycle events emitted while processing to stderr
        #[arg(long)]
        events: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { sitemap } => {
            cmd_validate(&sitemap)?;
        }
        Commands::Info { sitemap } => {
            cmd_info(&sitemap)?;
        }
        Commands::Process {
            sitemap,
            uri,
            params,
            headers,
            view,
            events,
        } => {
            cmd_process(&sitemap, &uri, params, headers, view, events).await?;
        }
    }

    Ok(())
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected K=V, got '{s}'")),
    }
}

fn load_config(path: &Path) -> anyhow::Result<SitemapConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = SitemapConfig::from_json(&text)?;
    Ok(config)
}

/// Built-in components reading sources relative to the sitemap's directory.
fn components_for(path: &Path) -> ComponentManager {
    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ComponentManager::with_defaults().with_resolver(Arc::new(FileSourceResolver::with_root(root)))
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let diagnostics = validate(&config, &components_for(path));

    if diagnostics.is_empty() {
        println!("Sitemap is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        match &diag.location {
            Some(location) => println!("[{}] {} at {}: {}", severity, diag.rule, location, diag.message),
            None => println!("[{}] {}: {}", severity, diag.rule, diag.message),
        }
        if let Some(fix) = &diag.fix {
            println!("        fix: {fix}");
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;

    println!("Sitemap: {}", path.display());
    println!("Pipelines: {}", config.pipelines.len());
    println!("Statements: {}", config.statement_count());
    if let Some(flow) = &config.flow {
        println!("Flow: {}", flow.language);
    }

    for (i, pipeline) in config.pipelines.iter().enumerate() {
        let mut flags = Vec::new();
        if pipeline.internal_only {
            flags.push("internal-only");
        }
        if pipeline.pass_through {
            flags.push("pass-through");
        }
        println!(
            "  [{}] {} statements={} handlers={} {}",
            i,
            pipeline.id.as_deref().unwrap_or("(anonymous)"),
            pipeline.statements.len(),
            pipeline.handle_errors.len(),
            flags.join(" ")
        );
    }

    if !config.views.is_empty() {
        println!("\nViews:");
        for view in &config.views {
            let label = view.from_label.as_deref().unwrap_or("-");
            println!("  {} label={} position={:?}", view.name, label, view.from_position);
        }
    }
    if !config.resources.is_empty() {
        println!("\nResources:");
        for resource in &config.resources {
            println!("  {} statements={}", resource.name, resource.statements.len());
        }
    }
    if !config.action_sets.is_empty() {
        println!("\nAction sets:");
        for set in &config.action_sets {
            println!("  {} actions={}", set.name, set.actions.len());
        }
    }
    if !config.globals.is_empty() {
        println!("\nGlobals:");
        for (name, value) in &config.globals {
            println!("  {name} = {value}");
        }
    }
    Ok(())
}

async fn cmd_process(
    path: &Path,
    uri: &str,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    view: Option<String>,
    show_events: bool,
) -> anyhow::Result<()> {
    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("sitemap path has no file name")?;
    let services = SitemapServices::new(components_for(path));
    let processor = TreeProcessor::load(source, services, ProcessorConfig::default()).await?;
    let mut events = processor.subscribe();
    tracing::debug!(sitemap = %path.display(), uri, "Processing request");

    let mut env = Environment::new(uri);
    for (name, value) in params {
        env = env.with_parameter(name, value);
    }
    for (name, value) in &headers {
        env = env.with_header(name, value.clone());
    }
    if let Some(view) = view {
        env = env.with_view(view);
    }

    let result = processor.process(&mut env).await;

    if show_events {
        while let Ok(event) = events.try_recv() {
            eprintln!("{}", serde_json::to_string(&event)?);
        }
    }
    processor.dispose().await;

    if let Err(err) = &result {
        tracing::error!(uri, error = %err, "Request failed");
    }
    if !result? {
        anyhow::bail!("No pipeline handled '{uri}'");
    }

    let response = env.response();
    eprintln!("Status: {}", response.status);
    if let Some(content_type) = &response.content_type {
        eprintln!("Content-Type: {content_type}");
    }
    for (name, value) in &response.headers {
        eprintln!("{name}: {value}");
    }
    std::io::stdout().write_all(&response.body)?;
    Ok(())
}
