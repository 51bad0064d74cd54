// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `strata`: developer CLI for the Strata rule engine.
//!
//! Loads a knowledge base directory and either lists its templates, expands
//! a construct, or resolves a graph document to a fixpoint. Results go to
//! stdout as text or YAML; logs go to stderr.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use strata_config::{ConfigService, EngineConfig, FsConfigStore, ENGINE_CONFIG_KEY};
use strata_core::consumption::{consume_from_resource, resolve_delayed};
use strata_core::reader::{graph_from_yaml, graph_to_yaml, load_knowledge_base};
use strata_core::{
    ConstructConstraint, ConstructExpansionContext, Functionality, KnowledgeBase, OperationalRuleContext, Resource,
    ResourceGraph, ResourceId, Value,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "strata", author, version, about = "Strata rule engine developer CLI")]
struct Cli {
    /// Engine settings file (JSON). Defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// `tracing` filter directive, e.g. `strata_core=debug`.
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered resource templates with their functionality.
    Types(KbArgs),
    /// Print the ways a construct can expand into concrete resources.
    Expand(ExpandArgs),
    /// Apply operational rules to a graph until nothing changes.
    Apply(ApplyArgs),
}

#[derive(Args, Debug)]
struct KbArgs {
    /// Knowledge base directory holding `resources/` and `edges/`.
    #[arg(long)]
    kb: PathBuf,
}

#[derive(Args, Debug)]
struct ExpandArgs {
    #[command(flatten)]
    kb: KbArgs,
    /// Construct id, e.g. `abstract:unit:api`.
    #[arg(long)]
    construct: ResourceId,
    /// Functionality the base resource must have.
    #[arg(long)]
    functionality: Functionality,
    /// Attribute the expansion must provide (repeatable).
    #[arg(long = "attr")]
    attributes: Vec<String>,
    /// Restrict the base resource to one type (`type` or `provider:type`).
    #[arg(long = "type")]
    kind: Option<String>,
    /// Solutions kept before giving up.
    #[arg(long)]
    max_solutions: Option<usize>,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    #[command(flatten)]
    kb: KbArgs,
    /// Graph document (`resources` and `source -> target` `edges`).
    #[arg(long)]
    graph: PathBuf,
    /// Rule passes allowed before giving up.
    #[arg(long, default_value_t = 10)]
    max_passes: usize,
    /// Hops searched downstream of an anchor for namespace resources.
    #[arg(long)]
    radius: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.log.as_deref(), &config)?;
    debug!(?config, "engine settings");

    let mut out = io::stdout().lock();
    match cli.command {
        Commands::Types(args) => types(&args, &mut out),
        Commands::Expand(args) => expand(&args, &config, &mut out),
        Commands::Apply(args) => apply(&args, &config, &mut out),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = path {
        return EngineConfig::from_file(path).with_context(|| format!("reading config {}", path.display()));
    }
    match FsConfigStore::new() {
        Ok(store) => Ok(ConfigService::new(store).load_or_default(ENGINE_CONFIG_KEY)?),
        // No resolvable home directory.
        Err(_) => Ok(EngineConfig::default()),
    }
}

/// `--log` wins over `RUST_LOG`, which wins over the configured filter.
fn init_logging(flag: Option<&str>, config: &EngineConfig) -> Result<()> {
    let filter = match flag {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.log_filter)?,
        },
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

fn load_kb(args: &KbArgs) -> Result<KnowledgeBase> {
    let kb = load_knowledge_base(&args.kb)
        .with_context(|| format!("loading knowledge base {}", args.kb.display()))?;
    info!(
        templates = kb.list_resources().count(),
        edges = kb.list_edges().count(),
        "loaded knowledge base"
    );
    Ok(kb)
}

fn types(args: &KbArgs, out: &mut impl Write) -> Result<()> {
    let kb = load_kb(args)?;
    let mut table = Table::new();
    table.set_header(vec!["type", "functionality", "is", "gives"]);
    for template in kb.list_resources() {
        let gives: Vec<String> = template.classification.gives.iter().map(ToString::to_string).collect();
        table.add_row(vec![
            template.qualified_type_name.clone(),
            template.get_functionality().to_string(),
            template.classification.is.join(", "),
            gives.join(", "),
        ]);
    }
    writeln!(out, "{table}")?;
    Ok(())
}

fn expand(args: &ExpandArgs, config: &EngineConfig, out: &mut impl Write) -> Result<()> {
    let kb = load_kb(&args.kb)?;
    let construct = Resource::new(args.construct.clone());
    let constraint = ConstructConstraint {
        target: args.construct.clone(),
        kind: args.kind.clone(),
        attributes: args
            .attributes
            .iter()
            .map(|a| (a.clone(), Value::Bool(true)))
            .collect(),
    };
    let max_solutions = args.max_solutions.unwrap_or(config.max_expansion_solutions);
    let solutions = ConstructExpansionContext::new(&kb)
        .with_bounds(config.max_expansion_depth, max_solutions)
        .expand_construct(&construct, args.functionality, &[constraint])?;
    info!(construct = %args.construct, solutions = solutions.len(), "expanded construct");
    write!(out, "{}", serde_yaml::to_string(&solutions)?)?;
    Ok(())
}

fn apply(args: &ApplyArgs, config: &EngineConfig, out: &mut impl Write) -> Result<()> {
    let kb = load_kb(&args.kb)?;
    let text = std::fs::read_to_string(&args.graph)
        .with_context(|| format!("reading graph {}", args.graph.display()))?;
    let mut graph = graph_from_yaml(&text, &kb)?;
    let radius = args.radius.unwrap_or(config.traversal_radius);
    resolve(&mut graph, &kb, radius, args.max_passes)?;
    propagate(&mut graph, &kb)?;
    write!(out, "{}", graph_to_yaml(&graph)?)?;
    Ok(())
}

fn resolve(graph: &mut ResourceGraph, kb: &KnowledgeBase, radius: usize, max_passes: usize) -> Result<()> {
    let mut ctx = OperationalRuleContext::new(graph, kb).with_radius(radius);
    for pass in 1..=max_passes {
        let result = ctx.apply_pass().with_context(|| format!("rule pass {pass}"))?;
        if result.is_empty() {
            info!(passes = pass, resources = ctx.graph.len(), "rules reached a fixpoint");
            return Ok(());
        }
        debug!(
            pass,
            created = result.created_resources.len(),
            edges = result.added_dependencies.len(),
            "rule pass changed the graph"
        );
    }
    bail!("rules still changing the graph after {max_passes} passes");
}

/// Feeds emitted values along every edge in both directions, then applies
/// what was waiting on resources that now exist.
fn propagate(graph: &mut ResourceGraph, kb: &KnowledgeBase) -> Result<()> {
    let mut delays = Vec::new();
    for edge in graph.edges() {
        delays.extend(consume_from_resource(graph, kb, &edge.source, &edge.target)?);
        delays.extend(consume_from_resource(graph, kb, &edge.target, &edge.source)?);
    }
    let waiting = resolve_delayed(graph, kb, delays)?;
    if !waiting.is_empty() {
        warn!(count = waiting.len(), "consumptions still waiting on missing resources");
    }
    Ok(())
}
