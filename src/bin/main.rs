use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use schema_link::alias::AliasConfig;
use schema_link::llm::LlmClient;
use schema_link::pipeline::{build_knowledge_graph, GraphBuildOptions, QueryPipeline, ReconciliationPipeline};
use schema_link::rules::{ExportQueryType, RuleEngine, SemanticSuggestion};
use schema_link::schema::{SchemaCatalog, TableSchema};
use schema_link::sql_gen::SqlDialect;
use schema_link::storage::{FileGraphStore, GraphStore};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "schema-link")]
#[command(about = "Knowledge-graph-guided SQL generation and schema reconciliation")]
struct Cli {
    /// Directory holding saved knowledge graphs
    #[arg(long, default_value = "graphs")]
    store_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Postgres,
    Mysql,
    Sqlserver,
    Sqlite,
}

impl From<DialectArg> for SqlDialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgres => SqlDialect::Postgres,
            DialectArg::Mysql => SqlDialect::MySql,
            DialectArg::Sqlserver => SqlDialect::SqlServer,
            DialectArg::Sqlite => SqlDialect::Sqlite,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportArg {
    All,
    Matched,
}

#[derive(Subcommand)]
enum Command {
    /// Build a knowledge graph from a schema file and save it
    BuildGraph {
        /// JSON file containing an array of table schemas
        schema: PathBuf,

        /// Name to store the graph under
        #[arg(long)]
        name: String,

        /// Ask the LLM for extra relationship suggestions
        #[arg(long)]
        use_llm: bool,

        /// OpenAI API key (or set OPENAI_API_KEY)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Parse a natural-language query into a structured intent
    Parse {
        query: String,

        #[arg(long)]
        graph: String,

        #[arg(long)]
        schema: PathBuf,

        /// Static alias configuration file (JSON)
        #[arg(long)]
        aliases: Option<PathBuf>,
    },

    /// Generate SQL for a natural-language query
    Sql {
        query: String,

        #[arg(long)]
        graph: String,

        #[arg(long)]
        schema: PathBuf,

        #[arg(long)]
        aliases: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "postgres")]
        dialect: DialectArg,

        #[arg(long)]
        limit: Option<u64>,

        /// Emit SQL even when it degraded to a placeholder join condition
        #[arg(long)]
        allow_degraded: bool,
    },

    /// Generate reconciliation rules between two schema files
    Ruleset {
        source: PathBuf,
        target: PathBuf,

        /// Existing knowledge graph to seed candidates from
        #[arg(long)]
        graph: Option<String>,

        /// External semantic suggestions file (JSON)
        #[arg(long)]
        suggestions: Option<PathBuf>,

        #[arg(long)]
        min_confidence: Option<f64>,

        #[arg(long, value_enum, default_value = "postgres")]
        dialect: DialectArg,

        #[arg(long, default_value_t = 100)]
        limit: u64,

        /// Export the rules as SQL text instead of JSON
        #[arg(long, value_enum)]
        export: Option<ExportArg>,
    },
}

fn load_catalog(path: &Path) -> Result<SchemaCatalog> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading schema file {}", path.display()))?;
    let tables: Vec<TableSchema> =
        serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?;
    Ok(SchemaCatalog::from_tables(tables))
}

fn load_aliases(path: Option<&PathBuf>) -> Result<AliasConfig> {
    match path {
        None => Ok(AliasConfig::new()),
        Some(p) => {
            let json = std::fs::read_to_string(p)
                .with_context(|| format!("reading alias file {}", p.display()))?;
            Ok(serde_json::from_str(&json)?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let store = FileGraphStore::new(&cli.store_dir);

    match cli.command {
        Command::BuildGraph {
            schema,
            name,
            use_llm,
            api_key,
        } => {
            let catalog = load_catalog(&schema)?;
            let mut options = GraphBuildOptions::default();
            if use_llm {
                let key = api_key
                    .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                    .context("--use-llm needs --api-key or OPENAI_API_KEY")?;
                options.llm = Some(LlmClient::new(key));
            }
            let graph = build_knowledge_graph(&catalog, options).await;
            info!(
                "Built graph: {} nodes, {} relationships",
                graph.node_count(),
                graph.relationships().len()
            );
            store.save(&name, &graph)?;
            println!("Saved graph '{}'", name);
        }

        Command::Parse {
            query,
            graph,
            schema,
            aliases,
        } => {
            let catalog = load_catalog(&schema)?;
            let kg = store.load(&graph)?;
            let pipeline = QueryPipeline::new(catalog, kg)
                .with_static_aliases(load_aliases(aliases.as_ref())?);
            let intent = pipeline.parse_intent(&query);
            println!("{}", serde_json::to_string_pretty(&intent)?);
        }

        Command::Sql {
            query,
            graph,
            schema,
            aliases,
            dialect,
            limit,
            allow_degraded,
        } => {
            let catalog = load_catalog(&schema)?;
            let kg = store.load(&graph)?;
            let mut pipeline = QueryPipeline::new(catalog, kg)
                .with_static_aliases(load_aliases(aliases.as_ref())?)
                .with_dialect(dialect.into());
            if let Some(n) = limit {
                pipeline = pipeline.with_row_limit(n);
            }
            let result = pipeline.generate_sql(&query)?;
            for warning in &result.warnings {
                warn!("{}", warning);
            }
            if result.degraded && !allow_degraded {
                bail!(
                    "generated SQL uses a placeholder join condition; rerun with --allow-degraded to emit it anyway"
                );
            }
            println!("{}", result.sql);
        }

        Command::Ruleset {
            source,
            target,
            graph,
            suggestions,
            min_confidence,
            dialect,
            limit,
            export,
        } => {
            let source_catalog = load_catalog(&source)?;
            let target_catalog = load_catalog(&target)?;
            let kg = match graph {
                Some(name) => store.load(&name)?,
                None => schema_link::KnowledgeGraph::new(),
            };
            let external: Vec<SemanticSuggestion> = match suggestions {
                None => Vec::new(),
                Some(p) => {
                    let json = std::fs::read_to_string(&p)
                        .with_context(|| format!("reading suggestions file {}", p.display()))?;
                    serde_json::from_str(&json)?
                }
            };

            let mut engine = RuleEngine::new()
                .with_dialect(dialect.into())
                .with_row_limit(limit);
            if let Some(threshold) = min_confidence {
                engine = engine.with_min_confidence(threshold);
            }
            let pipeline = ReconciliationPipeline::new(engine);

            let source_name = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "source".to_string());
            let target_name = target
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "target".to_string());

            let ruleset = pipeline.generate_ruleset(
                &source_name,
                &source_catalog,
                &target_name,
                &target_catalog,
                &kg,
                &external,
            );
            match export {
                None => println!("{}", serde_json::to_string_pretty(&ruleset)?),
                Some(ExportArg::All) => {
                    println!("{}", pipeline.export_ruleset(&ruleset, ExportQueryType::All))
                }
                Some(ExportArg::Matched) => println!(
                    "{}",
                    pipeline.export_ruleset(&ruleset, ExportQueryType::Matched)
                ),
            }
        }
    }

    Ok(())
}
