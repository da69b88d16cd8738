//! `novel`: drive the narrative engine from the command line.
//!
//! Streaming generation writes one JSON event per line to stdout; logs go to
//! stderr so the two can be piped separately.
//!
//! ```bash
//! novel init --title "The Salt Road" --genre fantasy
//! novel generate --novel <id> --outline "Lin reaches the salt gate" > chapter.ndjson
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use novel_core::versioning::AUTHOR_RESTORE;
use novel_core::{
    AnnotationId, ChapterId, ChapterRequest, EngineConfig, GenerationEvent, Generator,
    HttpRetrievalIndex, NovelEngine, NovelId, PlanId, Store, StreamOutcome, TechniqueId,
    VersionId, VersionLedger, VersionParent, VolumeId,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "novel", about = "Narrative memory and consistency engine")]
struct Cli {
    /// Database file (defaults to $NOVEL_DB, then ./novel.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a novel
    Init {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        genre: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Generate a chapter from a seed outline
    Generate {
        #[arg(long)]
        novel: NovelId,
        #[arg(long)]
        outline: String,
        #[arg(long)]
        title: Option<String>,
        /// Chapter number (defaults to the next free one)
        #[arg(long)]
        number: Option<u32>,
        #[arg(long)]
        volume: Option<VolumeId>,
        /// Print the finished chapter as one JSON object instead of streaming
        #[arg(long)]
        no_stream: bool,
    },

    /// Generate the chapter for a confirmed plan
    PlanGenerate {
        #[arg(long)]
        plan: PlanId,
        #[arg(long)]
        no_stream: bool,
    },

    /// Record a note on a passage of a chapter
    Annotate {
        #[arg(long)]
        chapter: ChapterId,
        /// Exact text the note refers to
        #[arg(long)]
        quote: String,
        /// Char offset where the quote was seen
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long, default_value = "")]
        note: String,
    },

    /// Rewrite an annotated passage
    ApplyAnnotation {
        #[arg(long)]
        annotation: AnnotationId,
        /// Use this text instead of asking the generator
        #[arg(long)]
        replacement: Option<String>,
        /// Only show the generator's suggestion; write nothing
        #[arg(long, conflicts_with = "replacement")]
        propose: bool,
    },

    /// List the version history of a chapter, plan or technique
    Versions {
        #[arg(long, group = "parent")]
        chapter: Option<ChapterId>,
        #[arg(long, group = "parent")]
        plan: Option<PlanId>,
        #[arg(long, group = "parent")]
        technique: Option<TechniqueId>,
    },

    /// Make a stored version live again
    Restore {
        #[arg(long)]
        version: VersionId,
    },

    /// Check the retrieval indexes
    Health,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn db_path(cli: &Cli) -> PathBuf {
    cli.db
        .clone()
        .or_else(|| std::env::var("NOVEL_DB").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("novel.db"))
}

fn open_store(cli: &Cli) -> Result<Arc<Store>> {
    let path = db_path(cli);
    let store = Store::open(&path)
        .with_context(|| format!("failed to open novel store at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn open_engine(cli: &Cli, config: EngineConfig) -> Result<NovelEngine> {
    let mut claude = claude::Claude::from_env()
        .context("ANTHROPIC_API_KEY must be set (in the environment or .env)")?;
    if let Some(model) = &config.generation.model {
        claude = claude.with_model(model.clone());
    }
    let generator: Arc<dyn Generator> = Arc::new(claude);
    Ok(NovelEngine::new(open_store(cli)?, generator, config))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = EngineConfig::from_env();

    match &cli.command {
        Commands::Init {
            title,
            genre,
            description,
        } => {
            let novel = open_store(&cli)?.create_novel(title, genre, description)?;
            print_json(&novel)
        }
        Commands::Generate {
            novel,
            outline,
            title,
            number,
            volume,
            no_stream,
        } => {
            let request = ChapterRequest::Direct {
                novel_id: *novel,
                outline: outline.clone(),
                title: title.clone(),
                number: *number,
                volume_id: *volume,
            };
            cmd_generate(open_engine(&cli, config)?, request, *no_stream).await
        }
        Commands::PlanGenerate { plan, no_stream } => {
            cmd_generate(open_engine(&cli, config)?, ChapterRequest::plan(*plan), *no_stream).await
        }
        Commands::Annotate {
            chapter,
            quote,
            start,
            note,
        } => {
            let annotation = open_engine(&cli, config)?
                .annotations()
                .annotate(*chapter, quote, *start, note)?;
            print_json(&annotation)
        }
        Commands::ApplyAnnotation {
            annotation,
            replacement,
            propose,
        } => {
            let service = open_engine(&cli, config)?.annotations();
            if *propose {
                return print_json(&service.propose(*annotation).await?);
            }
            let applied = match replacement {
                Some(text) => service.apply(*annotation, text)?,
                None => service.apply_generated(*annotation).await?,
            };
            tracing::info!(version = applied.snapshot.number, "previous text saved");
            print_json(&applied.chapter)
        }
        Commands::Versions {
            chapter,
            plan,
            technique,
        } => {
            let parent = match (chapter, plan, technique) {
                (Some(id), _, _) => VersionParent::Chapter(*id),
                (_, Some(id), _) => VersionParent::Plan(*id),
                (_, _, Some(id)) => VersionParent::Technique(*id),
                _ => bail!("pass one of --chapter, --plan or --technique"),
            };
            let history = VersionLedger::new(open_store(&cli)?).history(parent)?;
            print_json(&history)
        }
        Commands::Restore { version } => {
            let restored = VersionLedger::new(open_store(&cli)?).restore(*version, AUTHOR_RESTORE)?;
            print_json(&restored)
        }
        Commands::Health => cmd_health(&config).await,
    }
}

async fn cmd_generate(engine: NovelEngine, request: ChapterRequest, no_stream: bool) -> Result<()> {
    let controller = engine.controller();

    if no_stream {
        let outcome = controller.generate(request).await?;
        #[derive(Serialize)]
        struct Output<'a> {
            chapter: &'a novel_core::Chapter,
            side_effects: &'a novel_core::SideEffectReport,
        }
        return print_json(&Output {
            chapter: &outcome.chapter,
            side_effects: &outcome.side_effects,
        });
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling generation");
            on_interrupt.cancel();
        }
    });

    let (mut events, handle) = controller.spawn_stream(request, cancel);
    let mut stdout = std::io::stdout().lock();
    while let Some(event) = events.recv().await {
        stdout.write_all(event.to_ndjson()?.as_bytes())?;
        stdout.flush()?;
        if let GenerationEvent::Error { message } = &event {
            tracing::error!(%message, "generation failed");
        }
    }
    drop(stdout);

    match handle.await.context("generation task panicked")? {
        Ok(StreamOutcome::Completed(outcome)) => {
            if outcome.side_effects.has_failures() {
                tracing::warn!(report = ?outcome.side_effects, "chapter saved, some follow-up steps failed");
            }
            Ok(())
        }
        Ok(StreamOutcome::Cancelled) => bail!("generation cancelled, nothing was saved"),
        Err(e) => Err(e.into()),
    }
}

async fn cmd_health(config: &EngineConfig) -> Result<()> {
    let (narrative, technique) = HttpRetrievalIndex::from_config(&config.retrieval);
    let mut healthy = true;
    for (name, index) in [("narrative", narrative), ("technique", technique)] {
        let Some(index) = index else {
            println!("{name}: not configured");
            continue;
        };
        match index.health().await {
            Ok(status) => {
                healthy &= status.healthy;
                println!("{name}: {}", status.detail);
            }
            Err(e) => {
                healthy = false;
                println!("{name}: unreachable ({e})");
            }
        }
    }
    if !healthy {
        bail!("one or more retrieval indexes are unhealthy");
    }
    // Generation needs a key but no round trip to check it.
    if claude::Claude::from_env().is_err() {
        println!("generator: ANTHROPIC_API_KEY not set");
    } else {
        println!("generator: configured");
    }
    Ok(())
}
