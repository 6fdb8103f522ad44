//! CLI entry point for the knowledge-base retrieval core.
//!
//! Builds a knowledge base from records, answers queries against it and
//! reports on its health and performance.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use kbsearch::display::{create_benchmark_progress, create_spinner};
use kbsearch::error::BuildError;
use kbsearch::search::{DEFAULT_BENCHMARK_QUERIES, run_benchmark_with_progress};
use kbsearch::vector::create_embedding_generator;
use kbsearch::{
    BuildOptions, IndexBuilder, KnowledgeBase, SearchError, SearchHit, SearchService, Settings,
    load_records, validate_knowledge_base,
};
use tracing_subscriber::EnvFilter;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Knowledge-base retrieval
#[derive(Parser)]
#[command(
    name = "kbsearch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Semantic search over a domain knowledge base",
    long_about = "Build a vector index from knowledge records and answer questions with the most relevant passages.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .kbsearch directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Build the knowledge base from a CSV, JSON or JSONL records file
    #[command(
        about = "Chunk, embed and index knowledge records",
        after_help = "Examples:\n  kbsearch build data/diseases.jsonl --progress\n  KB_EMBEDDING__MODEL=hashing kbsearch build records.json\n  kbsearch build exports/diseases.csv"
    )]
    Build {
        /// Records file (CSV with a header row, JSON array, or one object per line)
        records: PathBuf,

        /// Show progress during embedding
        #[arg(short, long)]
        progress: bool,
    },

    /// Answer a single question
    #[command(
        about = "Search the knowledge base",
        after_help = "Examples:\n  kbsearch search \"my tomato plant has curling leaves\"\n  kbsearch search \"wheat rust\" -k 5 --json | jq '.[].score'"
    )]
    Search {
        /// Question text
        query: String,

        /// Number of results (defaults to search.default_k)
        #[arg(short)]
        k: Option<usize>,

        /// Caller identity used for rate limiting
        #[arg(long, default_value = "cli")]
        caller: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Interactive search session over one loaded service
    #[command(about = "Read questions from stdin until EOF or 'exit'")]
    Repl {
        /// Caller identity used for rate limiting
        #[arg(long, default_value = "repl")]
        caller: String,
    },

    /// Check the persisted knowledge base for consistency
    #[command(about = "Validate index and chunk list alignment")]
    Validate {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run a query suite and report latency and relevance
    #[command(about = "Benchmark search performance")]
    Benchmark {
        /// File with one query per line (defaults to a built-in suite)
        #[arg(short, long)]
        queries: Option<PathBuf>,

        /// Results per query
        #[arg(short, default_value = "3")]
        k: usize,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(config_path) => match Settings::load_from(config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Configuration error loading from {}: {e}",
                    config_path.display()
                );
                return ExitCode::FAILURE;
            }
        },
        None => Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            Settings::default()
        }),
    };

    init_tracing(&config);

    match run(cli.command, config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &Settings) {
    let fallback = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands, config: Settings) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(".", force)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
            Ok(ExitCode::SUCCESS)
        }

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Build { records, progress } => build(&config, &records, progress),

        Commands::Search {
            query,
            k,
            caller,
            json,
        } => {
            let Some(service) = open_service(&config) else {
                return Ok(ExitCode::FAILURE);
            };
            let k = k.unwrap_or(service.default_k());
            match service.search(&query, k, &caller) {
                Ok(hits) if json => {
                    println!("{}", serde_json::to_string_pretty(&hits)?);
                    Ok(ExitCode::SUCCESS)
                }
                Ok(hits) => {
                    print_hits(&hits);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    report_search_error(&e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Commands::Repl { caller } => repl(&config, &caller),

        Commands::Validate { json } => {
            let kb = match KnowledgeBase::load(&config.index_path) {
                Ok(kb) => kb,
                Err(e) => {
                    report(&e, &e.recovery_suggestions());
                    return Ok(ExitCode::FAILURE);
                }
            };
            let report = validate_knowledge_base(&kb);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
            Ok(if report.is_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Benchmark { queries, k, json } => {
            let queries = match queries {
                Some(path) => read_queries(&path)?,
                None => DEFAULT_BENCHMARK_QUERIES
                    .iter()
                    .map(|q| q.to_string())
                    .collect(),
            };
            let Some(service) = open_service(&config) else {
                return Ok(ExitCode::FAILURE);
            };

            let progress = (!json).then(|| create_benchmark_progress(queries.len() as u64));
            let report = run_benchmark_with_progress(&service, &queries, k, |done| {
                if let Some(pb) = &progress {
                    pb.set_position(done as u64);
                }
            });
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build(config: &Settings, records_path: &Path, progress: bool) -> anyhow::Result<ExitCode> {
    let records = match load_records(records_path) {
        Ok(records) => records,
        Err(e) => {
            let e = BuildError::from(e);
            report(&e, &e.recovery_suggestions());
            return Ok(ExitCode::FAILURE);
        }
    };
    println!(
        "Loaded {} records from {}",
        records.len(),
        records_path.display()
    );

    let spinner = progress.then(|| create_spinner("Loading embedding model"));
    let embedder = create_embedding_generator(
        &config.embedding.model,
        config.embedding.cache_dir.clone(),
        config.embedding.show_download_progress,
    );
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let embedder = match embedder {
        Ok(embedder) => embedder,
        Err(e) => {
            let e = BuildError::from(e);
            report(&e, &e.recovery_suggestions());
            return Ok(ExitCode::FAILURE);
        }
    };

    let options = BuildOptions::from_settings(config).with_progress(progress);
    match IndexBuilder::new(embedder, options).build_to(&records, &config.index_path) {
        Ok(summary) => {
            println!("{summary}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            report(&e, &e.recovery_suggestions());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn repl(config: &Settings, caller: &str) -> anyhow::Result<ExitCode> {
    let Some(service) = open_service(config) else {
        return Ok(ExitCode::FAILURE);
    };
    println!(
        "Loaded {} chunks ({}). Type a question, 'metrics', or 'exit'.",
        service.knowledge_base().len(),
        service.knowledge_base().index().topology()
    );

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        stdout.flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("failed to read from stdin")?;
        let input = line.trim();

        match input {
            "exit" | "quit" => break,
            "metrics" => println!("{}", service.metrics()),
            _ => match service.search_default(input, caller) {
                Ok(hits) => print_hits(&hits),
                Err(SearchError::EmptyQuery) => {}
                Err(e) => report_search_error(&e),
            },
        }
        service.purge_expired_cache();
    }

    println!();
    println!("{}", service.metrics());
    Ok(ExitCode::SUCCESS)
}

fn open_service(config: &Settings) -> Option<SearchService> {
    match SearchService::open(config) {
        Ok(service) => Some(service),
        Err(e) => {
            report(&e, &e.recovery_suggestions());
            None
        }
    }
}

fn read_queries(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read queries from {}", path.display()))?;
    let queries: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    anyhow::ensure!(!queries.is_empty(), "{} contains no queries", path.display());
    Ok(queries)
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!("{}. [{:.3}] {}", rank + 1, hit.score.get(), hit.text);
    }
}

fn report_search_error(e: &SearchError) {
    report(e, &e.recovery_suggestions());
}

fn report(error: &dyn std::fmt::Display, suggestions: &[&str]) {
    eprintln!("Error: {error}");
    if !suggestions.is_empty() {
        eprintln!("\nSuggestions:");
        for suggestion in suggestions {
            eprintln!("  - {suggestion}");
        }
    }
}
