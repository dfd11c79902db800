//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use paperpipe_core::stages::Generation;
use paperpipe_core::{
    PaperDeps, Prompts, ScholarHandler, SchemaGenerator, abstract_pipeline, paper_pipeline,
};
use paperpipe_crawler::{
    CrawlCoordinator, CrawlSession, FetchOptions, HttpDocumentSource, save_jsonl,
};
use paperpipe_discovery::{ArxivClient, SearchOptions};
use paperpipe_llm::{OpenRouterClient, OpenRouterOptions, TextGenerator};
use paperpipe_shared::{
    AppConfig, PipelineRecord, expand_home, init_config, load_config, load_config_from,
    validate, validate_api_key,
};
use paperpipe_storage::{SchemaCache, Storage, VectorStore};
use tracing::info;

use crate::progress::CliProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// paperpipe: turn papers and search results into structured, queryable chunks.
#[derive(Parser)]
#[command(
    name = "paperpipe",
    version,
    about = "Ingest scholarly documents: chunk, extract keywords and references, summarize, store.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.paperpipe/paperpipe.toml).
    #[arg(long, global = true, env = "PAPERPIPE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the paper pipeline on a document URL.
    Paper {
        /// Document URL (e.g. an arXiv HTML rendering).
        url: String,

        /// Run the keyword and reference branches one after the other.
        #[arg(long)]
        no_fan_out: bool,
    },

    /// Search for articles and store their abstracts with keywords.
    Search {
        /// Free-text query.
        query: String,

        /// Number of articles to request.
        #[arg(long)]
        max_results: Option<u32>,
    },

    /// Crawl scholar search results, following related searches.
    Crawl {
        /// Seed queries.
        #[arg(required = true)]
        queries: Vec<String>,

        /// Maximum related-search expansion depth.
        #[arg(long)]
        depth: Option<u32>,

        /// Queries processed at once.
        #[arg(long)]
        concurrency: Option<u32>,

        /// JSON Lines output file.
        #[arg(short, long, default_value = "scholar_results.jsonl")]
        out: PathBuf,
    },

    /// Print the section chunks of a local markdown file as JSON.
    Chunk {
        /// Markdown file.
        file: PathBuf,
    },

    /// Rank stored chunks against a text query.
    Query {
        /// Query text.
        text: String,

        /// Number of matches to print.
        #[arg(short, default_value = "5")]
        k: usize,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "paperpipe=info",
        1 => "paperpipe=debug",
        _ => "paperpipe=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Paper { url, no_fan_out } => {
            let mut config = resolve_config(config_path.as_deref())?;
            if no_fan_out {
                config.pipeline.fan_out = false;
            }
            cmd_paper(&config, &url).await
        }
        Command::Search { query, max_results } => {
            let mut config = resolve_config(config_path.as_deref())?;
            if let Some(n) = max_results {
                config.search.max_results = n;
            }
            cmd_search(&config, &query).await
        }
        Command::Crawl {
            queries,
            depth,
            concurrency,
            out,
        } => {
            let mut config = resolve_config(config_path.as_deref())?;
            if let Some(depth) = depth {
                config.crawl.max_depth = depth;
            }
            if let Some(concurrency) = concurrency {
                config.crawl.concurrency = concurrency;
            }
            validate(&config)?;
            cmd_crawl(&config, queries, &out).await
        }
        Command::Chunk { file } => cmd_chunk(&file),
        Command::Query { text, k } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_query(&config, &text, k).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn generator(config: &AppConfig) -> Result<Arc<dyn TextGenerator>> {
    let api_key = validate_api_key(config)?;
    let client = OpenRouterClient::new(OpenRouterOptions::from_config(&config.openrouter, api_key))?;
    Ok(Arc::new(client))
}

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = expand_home(&config.storage.db_path);
    Ok(Arc::new(Storage::open(&path).await?))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_paper(config: &AppConfig, url: &str) -> Result<()> {
    let generator = generator(config)?;
    let source = Arc::new(HttpDocumentSource::new(FetchOptions::from(&config.crawl))?);
    let storage = open_storage(config).await?;
    let prompts = Prompts::from_config(&config.prompts);

    let deps = PaperDeps {
        generator,
        source,
        store: storage,
    };
    let pipeline = paper_pipeline(deps, &config.pipeline, &prompts)?;
    info!(url, fan_out = config.pipeline.fan_out, "running paper pipeline");

    let reporter = CliProgress::new();
    let record = pipeline.run(PipelineRecord::new(url), &reporter).await?;

    println!();
    println!("  Document:   {}", record.source_locator());
    println!("  Sections:   {}", record.sections.len());
    println!("  Summaries:  {}", record.summaries.len());
    println!("  Keywords:");
    for keyword in &record.keywords {
        println!("    - {keyword}");
    }
    println!("  References: {}", record.references.len());
    for reference in &record.references {
        println!("    - {reference}");
    }
    print_errors(&record);
    Ok(())
}

async fn cmd_search(config: &AppConfig, query: &str) -> Result<()> {
    let generator = generator(config)?;
    let search = Arc::new(ArxivClient::new(SearchOptions::from(&config.search))?);
    let storage = open_storage(config).await?;
    let prompts = Prompts::from_config(&config.prompts);

    let pipeline = abstract_pipeline(generator, search, storage, &config.pipeline, &prompts)?;
    info!(query, max_results = config.search.max_results, "running abstract pipeline");

    let reporter = CliProgress::new();
    let record = pipeline.run(PipelineRecord::new(query), &reporter).await?;

    println!();
    println!("  Query:    {query}");
    println!("  Articles: {}", record.articles.len());
    for article in &record.articles {
        println!("    {} ({})", article.title, article.id);
        if !article.keywords.is_empty() {
            println!("      keywords: {}", article.keywords.join(", "));
        }
    }
    print_errors(&record);
    Ok(())
}

async fn cmd_crawl(config: &AppConfig, queries: Vec<String>, out: &Path) -> Result<()> {
    let generator = generator(config)?;
    let source = Arc::new(HttpDocumentSource::new(FetchOptions::from(&config.crawl))?);
    let prompts = Prompts::from_config(&config.prompts);

    let schemas = Arc::new(SchemaGenerator::new(
        SchemaCache::new(expand_home(&config.storage.schema_file)),
        source.clone(),
        Generation::new(generator, config.pipeline.max_retries),
        prompts.schema,
    ));
    let handler = Arc::new(ScholarHandler::new(source, schemas, &config.crawl));
    let coordinator = CrawlCoordinator::new(
        handler,
        config.crawl.concurrency as usize,
        config.crawl.max_depth,
    );

    info!(
        seeds = queries.len(),
        depth = config.crawl.max_depth,
        concurrency = config.crawl.concurrency,
        "starting scholar crawl"
    );
    let progress = CliProgress::new();
    progress.message(format!("Crawling {} seed quer(ies)", queries.len()));

    let mut session = CrawlSession::new();
    let report = coordinator.run(queries, &mut session).await;
    progress.finish();

    save_jsonl(out, session.results())?;

    println!();
    println!("  Queries:    {}", report.processed);
    println!("  Items:      {}", report.items_added);
    println!("  Duplicates: {}", report.duplicate_items);
    println!("  Output:     {}", out.display());
    println!("  Time:       {:.1}s", report.duration.as_secs_f64());
    if !report.failed.is_empty() {
        println!("  Failed:");
        for (query, error) in &report.failed {
            println!("    {query}: {error}");
        }
    }
    println!();
    Ok(())
}

fn cmd_chunk(file: &Path) -> Result<()> {
    let document = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let sections = paperpipe_markdown::chunk(&document);

    let map: serde_json::Map<String, serde_json::Value> = sections
        .iter()
        .map(|(key, body)| (key.as_str().to_string(), body.into()))
        .collect();
    println!("{}", serde_json::to_string_pretty(&map)?);
    Ok(())
}

async fn cmd_query(config: &AppConfig, text: &str, k: usize) -> Result<()> {
    let path = expand_home(&config.storage.db_path);
    let storage = Storage::open_readonly(&path).await?;
    let matches = storage.query(text, k).await?;

    if matches.is_empty() {
        println!("No matching chunks.");
        return Ok(());
    }
    for m in matches {
        let snippet: String = m.text.chars().take(120).collect();
        println!("{:.3}  {}  #{}", m.score, m.document_locator, m.section_key);
        println!("       {snippet}");
    }
    Ok(())
}

fn print_errors(record: &PipelineRecord) {
    if record.errors().is_empty() {
        println!();
        return;
    }
    println!("  Errors:");
    for err in record.errors() {
        println!("    {err}");
    }
    println!();
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
