//! CLI entry point: runs the indexer, or — with `--mcp` — the stdio
//! JSON-RPC retrieval server.

mod mcp;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use magsharp_core::config::{get_settings, reset_settings};
use magsharp_core::embedding::OllamaClient;
use magsharp_core::indexer::{Indexer, ProgressEvent};
use magsharp_core::retrieval::Retrieval;
use magsharp_core::store::VectorStore;
use magsharp_core::tokenizer::create_tokenizer;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "magsharp", about = "C# codebase semantic indexer and retrieval server")]
struct Cli {
    /// Override the codebase root to index.
    #[arg(long)]
    codebase: Option<String>,

    /// Clear the index before indexing.
    #[arg(long)]
    clear: bool,

    /// Verify the embeddings backend is reachable, then exit.
    #[arg(long)]
    check_ollama: bool,

    /// Print index statistics and exit.
    #[arg(long)]
    stats: bool,

    /// Run the stdio JSON-RPC retrieval server instead of indexing.
    #[arg(long)]
    mcp: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "magsharp=debug" } else { "magsharp=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(default_directive.parse().expect("valid directive")),
        )
        .with_target(false)
        .init();
}

fn progress_callback() -> Arc<dyn Fn(ProgressEvent) + Send + Sync> {
    Arc::new(|event: ProgressEvent| {
        let pct = if event.total > 0 {
            (event.current as f64 / event.total as f64) * 100.0
        } else {
            100.0
        };
        println!("[{}/{}] ({pct:.1}%) {}", event.current, event.total, event.message);
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load a `.env` file if present, before anything reads MAG_*/RUST_LOG.
    // Missing is fine; a malformed file is not, surfaced on stderr so it's
    // not silently ignored.
    match dotenvy::dotenv() {
        Ok(_) | Err(dotenvy::Error::Io(_)) => {}
        Err(e) => eprintln!("warning: failed to load .env: {e}"),
    }

    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(codebase) = &cli.codebase {
        std::env::set_var("MAG_CODEBASE_ROOT", codebase);
        reset_settings();
    }

    let config = match get_settings() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let backend = Arc::new(OllamaClient::new(
        config.ollama_host.clone(),
        config.embedding_model.clone(),
        config.llm_model.clone(),
    ));

    if cli.check_ollama {
        return if magsharp_core::embedding::EmbeddingBackend::healthy(backend.as_ref()).await {
            println!("Ollama backend reachable at {}", config.ollama_host);
            ExitCode::SUCCESS
        } else {
            eprintln!("Ollama backend unreachable at {}", config.ollama_host);
            ExitCode::FAILURE
        };
    }

    let store = match VectorStore::open(
        &config.qdrant_url,
        Some(&config.chroma_persist_dir),
        config.chroma_collection_name.clone(),
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "failed to open vector store");
            return ExitCode::FAILURE;
        }
    };

    let tokenizer = create_tokenizer("cl100k_base");

    if cli.stats {
        let stats = match store.stats().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to read stats");
                return ExitCode::FAILURE;
            }
        };
        println!("{}", serde_json::to_string_pretty(&stats).unwrap_or_default());
        return ExitCode::SUCCESS;
    }

    if cli.mcp {
        let retrieval = Retrieval::new(config.clone(), store.clone(), backend.clone());
        let indexer = Indexer::new(config, store, backend, tokenizer);
        mcp::run_mcp(retrieval, indexer).await;
        return ExitCode::SUCCESS;
    }

    if !magsharp_core::embedding::EmbeddingBackend::healthy(backend.as_ref()).await {
        eprintln!("Ollama backend unreachable at {}; indexing requires it", config.ollama_host);
        return ExitCode::FAILURE;
    }

    let indexer = Indexer::new(config, store, backend, tokenizer);

    if cli.clear {
        if let Err(e) = indexer.clear().await {
            tracing::error!(error = %e, "failed to clear index");
            return ExitCode::FAILURE;
        }
    }

    let result = tokio::select! {
        result = indexer.index(Some(progress_callback()), true) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            return ExitCode::from(130);
        }
    };

    match result {
        Ok(stats) => {
            println!("{}", serde_json::to_string_pretty(&stats).unwrap_or_default());
            if stats.errors > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "indexing failed");
            ExitCode::FAILURE
        }
    }
}
