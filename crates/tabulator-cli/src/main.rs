//! Tabulator CLI - federated concept queries

mod config;
mod errors;
mod output;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use config::Config;
use indexmap::IndexSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabulator_core::{
    EngineOptions, Model, ProfileEntry, QueryEngine, QueryError, QuerySpec, Router,
};
use tabulator_memory::{LoadError, load_model};
use tracing_subscriber::EnvFilter;

/// Output verbosity level.
#[derive(Clone, Copy)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    fn from_flags(verbose: u8, quiet: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else {
            match verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Debug,
            }
        }
    }

    /// Log filter used when `RUST_LOG` is not set.
    fn log_filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
        }
    }

    fn info(self, msg: &str) {
        if !matches!(self, Verbosity::Quiet) {
            println!("{msg}");
        }
    }

    fn debug(self, msg: &str) {
        if matches!(self, Verbosity::Verbose | Verbosity::Debug) {
            eprintln!("[debug] {msg}");
        }
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Aligned text columns
    #[default]
    Table,
    /// Pretty-printed JSON
    Json,
}

#[derive(Parser)]
#[command(name = "tabulator")]
#[command(about = "Federated concept queries over mapped data sources")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Model file (YAML, TOML, or JSON)
    #[arg(short, long, global = true)]
    model: Option<PathBuf>,

    /// Config file (default: ~/.config/tabulator/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More output (-v for info logs, -vv for debug logs)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print results and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List concepts and the data sources that hold them
    Concepts,

    /// Show the route connecting concepts
    Route {
        /// Concepts to connect
        #[arg(required = true)]
        concepts: Vec<String>,
        /// Concepts that would be filtered on
        #[arg(long = "filter")]
        filters: Vec<String>,
    },

    /// Run a list or pivot query file
    Query {
        /// Query file (YAML, TOML, or JSON)
        file: PathBuf,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
        /// Print where the time went
        #[arg(long)]
        profile: bool,
        /// Distinct values per data source lookup
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Generate man page
    Manpage,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config file
    let config = if let Some(ref path) = cli.config {
        Config::load_from_path(Some(path.clone()))
    } else {
        Config::load()
    };

    // Config defaults, CLI flags override
    let verbose = cli.verbose.max(u8::from(config.defaults.verbose));
    let verbosity = Verbosity::from_flags(verbose, cli.quiet);
    init_logging(verbosity);

    let model_path = cli.model.clone().or_else(|| config.defaults.model.clone());

    match cli.command {
        Commands::Concepts => {
            let model = open_model(model_path.as_deref(), &config, verbosity)?;
            cmd_concepts(&model, verbosity)
        }
        Commands::Route { concepts, filters } => {
            let model = open_model(model_path.as_deref(), &config, verbosity)?;
            cmd_route(&model, &concepts, &filters, verbosity)
        }
        Commands::Query {
            file,
            format,
            profile,
            batch_size,
        } => {
            let model = open_model(model_path.as_deref(), &config, verbosity)?;
            let mut options = EngineOptions::default()
                .with_profile(profile || config.defaults.profile);
            if let Some(batch_size) = batch_size.or(config.defaults.batch_size) {
                options = options.with_batch_size(batch_size);
            }
            cmd_query(QueryEngine::with_options(model, options), &file, format, verbosity)
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "tabulator", &mut std::io::stdout());
            Ok(())
        }
        Commands::Manpage => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            man.render(&mut std::io::stdout())?;
            Ok(())
        }
    }
}

fn init_logging(v: Verbosity) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(v.log_filter())),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_model(path: Option<&Path>, config: &Config, v: Verbosity) -> Result<Arc<Model>> {
    let path = path.context(
        "No model file given. Use --model <FILE> or set `model` under [defaults] in the config file",
    )?;

    let model = load_model(path, config.defaults.cache_capacity).map_err(|e| match e {
        LoadError::Io { path, source } => anyhow!(errors::file_read_error(&path, &source)),
        other => anyhow::Error::new(other)
            .context(format!("Failed to load model '{}'", path.display())),
    })?;

    v.debug(&format!(
        "Loaded {}: {} concepts, {} fields, {} mappings",
        path.display(),
        model.concepts().count(),
        model.fields().len(),
        model.mappings().len()
    ));
    Ok(Arc::new(model))
}

fn cmd_concepts(model: &Model, v: Verbosity) -> Result<()> {
    v.info("Concepts:\n");

    let mut total = 0;
    for concept in model.concepts() {
        let sources: IndexSet<&str> = model
            .fields_for(&concept.name)
            .map(|f| f.datasource.as_str())
            .collect();
        let mappings = model
            .mappings()
            .iter()
            .filter(|m| m.a.concept == concept.name || m.b.concept == concept.name)
            .count();

        println!("  {} ({:?})", concept.name, concept.value_type);
        v.info(&format!(
            "    sources:  {}",
            sources.into_iter().collect::<Vec<_>>().join(", ")
        ));
        v.info(&format!("    mappings: {mappings}"));
        total += 1;
    }

    v.info(&format!("\nTotal: {total} concepts"));
    Ok(())
}

fn cmd_route(model: &Model, concepts: &[String], filters: &[String], v: Verbosity) -> Result<()> {
    let route = Router::new(model)
        .find_route(concepts, filters)
        .map_err(|e| anyhow!(errors::query_error(&QueryError::from(e), model)))?;

    if route.is_empty() {
        v.info("Single concept: no mappings needed");
        return Ok(());
    }

    v.info(&format!("Route ({} hops):\n", route.hops()));
    for mapping in route.mappings() {
        println!(
            "  {} <-> {}  via {}.{}  cost {} / {}",
            mapping.a.concept,
            mapping.b.concept,
            mapping.a.datasource,
            mapping.table,
            mapping.forward_cost,
            mapping.reverse_cost
        );
    }
    v.info(&format!("\nTotal cost: {}", route.cost()));
    Ok(())
}

fn cmd_query(engine: QueryEngine, file: &Path, format: OutputFormat, v: Verbosity) -> Result<()> {
    let display = file.display().to_string();
    let data = std::fs::read(file).map_err(|e| anyhow!(errors::file_read_error(&display, &e)))?;
    let spec = QuerySpec::from_bytes(&data, file.to_str())
        .with_context(|| format!("Invalid query file '{display}'"))?;

    let model = engine.model();
    let explain = |e: QueryError| anyhow!(errors::query_error(&e, model));

    match &spec {
        QuerySpec::List(query) => {
            v.debug(&format!("List query over {:?}", query.concepts));
            let table = engine.get_list(query).map_err(explain)?;
            match format {
                OutputFormat::Table => print!("{}", output::render_table(&table)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&table)?),
            }
            v.debug(&format!("{} rows", table.len()));
        }
        QuerySpec::Table(query) => {
            v.debug(&format!(
                "Pivot query: rows {:?}, columns {:?}",
                query.rows, query.columns
            ));
            let pivot = engine.get_table(query).map_err(explain)?;
            match format {
                OutputFormat::Table => print!("{}", output::render_pivot(&pivot)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&pivot)?),
            }
        }
    }

    for entry in engine.profile() {
        print_profile(&entry);
    }
    Ok(())
}

fn print_profile(entry: &ProfileEntry) {
    let ms = |d: std::time::Duration| d.as_secs_f64() * 1000.0;
    eprintln!(
        "profile: {} rows, {} steps | route {:.3}ms, reduce {:.3}ms, post {:.3}ms, total {:.3}ms",
        entry.rows,
        entry.steps,
        ms(entry.route),
        ms(entry.reduce),
        ms(entry.post),
        ms(entry.total())
    );
}
