use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use notesrag::config::{self, Config};
use notesrag::embedding::Embedder;
use notesrag::index::IndexBuilder;
use notesrag::logging::{self, ConsoleTarget};
use notesrag::processing::{FileStatus, IngestSummary, Ingestor};
use notesrag::query::QueryService;
use notesrag::{api, index::SearchResult};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "notesrag",
    version,
    about = "Turn PDFs and slide decks into a vector index and answer questions over them"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract and chunk every PDF and PPTX under the raw directory.
    Ingest {
        #[arg(long)]
        raw_dir: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Model whose tokenizer defines window boundaries.
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        max_tokens: Option<usize>,
        #[arg(long)]
        overlap: Option<usize>,
    },
    /// Embed chunk records and activate a new index generation.
    BuildIndex {
        #[arg(long)]
        chunks: Option<PathBuf>,
        #[arg(long)]
        index_dir: Option<PathBuf>,
    },
    /// Print the passages closest to a question.
    Search {
        question: String,
        #[arg(long)]
        top_k: Option<i64>,
        #[arg(long)]
        index_dir: Option<PathBuf>,
    },
    /// Answer a question from the indexed notes.
    Ask {
        question: String,
        #[arg(long)]
        top_k: Option<i64>,
        #[arg(long)]
        index_dir: Option<PathBuf>,
    },
    /// Serve the HTTP API.
    Serve {
        #[arg(long)]
        index_dir: Option<PathBuf>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let console = match cli.command {
        Command::Serve { .. } => ConsoleTarget::Stdout,
        _ => ConsoleTarget::Stderr,
    };
    logging::init_tracing(console);
    let mut config = config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Ingest {
            raw_dir,
            out,
            model,
            max_tokens,
            overlap,
        } => {
            override_with(&mut config.raw_dir, raw_dir);
            override_with(&mut config.chunks_path, out);
            override_with(&mut config.tokenizer_model, model);
            override_with(&mut config.chunk_max_tokens, max_tokens);
            override_with(&mut config.chunk_overlap, overlap);
            ingest(config).await
        }
        Command::BuildIndex { chunks, index_dir } => {
            override_with(&mut config.chunks_path, chunks);
            override_with(&mut config.index_dir, index_dir);
            build_index(&config).await
        }
        Command::Search {
            question,
            top_k,
            index_dir,
        } => {
            override_with(&mut config.index_dir, index_dir);
            let service = QueryService::from_config(&config)?;
            let top_k = top_k.unwrap_or(service.default_top_k() as i64);
            let results = service.search(&question, top_k).await?;
            print_results(&results);
            Ok(())
        }
        Command::Ask {
            question,
            top_k,
            index_dir,
        } => {
            override_with(&mut config.index_dir, index_dir);
            let service = QueryService::from_config(&config)?;
            let top_k = top_k.unwrap_or(service.default_top_k() as i64);
            let answer = service.ask(&question, top_k).await?;
            println!("{}", answer.answer);
            println!();
            println!("Sources (generation {}):", answer.generation);
            for citation in &answer.sources {
                println!(
                    "  - {} page {} (distance {:.4})",
                    citation.source, citation.page, citation.distance
                );
            }
            Ok(())
        }
        Command::Serve { index_dir, port } => {
            override_with(&mut config.index_dir, index_dir);
            if port.is_some() {
                config.server_port = port;
            }
            serve(&config).await
        }
    }
}

fn override_with<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

async fn ingest(config: Config) -> Result<()> {
    let raw_dir = config.raw_dir.clone();
    let output = config.chunks_path.clone();
    let summary = tokio::task::spawn_blocking(move || -> Result<IngestSummary> {
        let ingestor = Ingestor::from_config(&config)?;
        Ok(ingestor.run(&raw_dir, &output)?)
    })
    .await
    .context("Ingestion task panicked")??;

    print_ingest_summary(&summary);
    Ok(())
}

fn print_ingest_summary(summary: &IngestSummary) {
    println!(
        "Ingested {} files ({} pages) into {} chunks -> {}",
        summary.files,
        summary.pages,
        summary.chunks,
        summary.output.display()
    );
    match summary.clamped_from {
        Some(requested) => println!(
            "Window: {} tokens (clamped from {requested}), overlap {}",
            summary.max_tokens, summary.overlap
        ),
        None => println!(
            "Window: {} tokens, overlap {}",
            summary.max_tokens, summary.overlap
        ),
    }
    for report in &summary.reports {
        match &report.status {
            FileStatus::Extracted => {}
            FileStatus::NoText => println!("  no text: {}", report.source),
            FileStatus::Failed(reason) => println!("  failed:  {} ({reason})", report.source),
        }
        for failure in &report.page_failures {
            println!(
                "  page failed: {} page {} ({})",
                report.source, failure.page, failure.reason
            );
        }
    }
}

async fn build_index(config: &Config) -> Result<()> {
    let embedder = Embedder::from_config(config).context("Failed to configure embeddings")?;
    let builder = IndexBuilder::from_config(config, embedder);
    let report = builder
        .build(&config.chunks_path, &config.index_dir)
        .await
        .with_context(|| format!("Failed to build index from {}", config.chunks_path.display()))?;

    println!(
        "Activated generation {} with {} vectors in {}",
        report.generation,
        report.vectors,
        report.directory.display()
    );
    if !report.pruned.is_empty() {
        println!("Pruned generations: {}", report.pruned.join(", "));
    }
    Ok(())
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No passages indexed.");
        return;
    }
    for result in results {
        println!(
            "{}. [{} page {}] distance {:.4}",
            result.rank, result.source, result.page, result.distance
        );
        println!("   {}", result.snippet);
    }
}

async fn serve(config: &Config) -> Result<()> {
    let service = QueryService::from_config(config).context("Failed to load the index")?;
    let (generation, vectors) = {
        let index = service.snapshot();
        (index.generation().to_string(), index.len())
    };
    let app = api::create_router(Arc::new(service));

    let (listener, port) = bind_listener(config.server_port)
        .await
        .context("Failed to bind listener")?;
    tracing::info!(generation = %generation, vectors, "Serving index");
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn bind_listener(server_port: Option<u16>) -> Result<(TcpListener, u16)> {
    use std::net::Ipv4Addr;

    if let Some(port) = server_port {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .with_context(|| format!("Port {port} is unavailable"))?;
        return Ok((listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }

    bail!("No available port found in range 4100-4199")
}
