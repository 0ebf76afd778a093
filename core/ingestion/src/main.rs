use anyhow::Result;
use clap::Parser;
use rapport_ingestion::{
    generator_from_config, router, AppState, CapturePipeline, Database, HttpTranscriber,
    LLMConfig, Persistence, PipelineConfig, ReconciliationHandler, SqliteStore,
    TranscriptionConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rapport-ingestion")]
#[command(about = "Capture service: turns voice or text captures into person-linked records")]
struct Args {
    /// SQLite database file
    #[arg(long, env = "DB_PATH")]
    db_path: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:21953")]
    bind: String,
}

fn default_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".rapport").join("rapport.db")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("Rapport Ingestion Service v{}", env!("CARGO_PKG_VERSION"));

    let db_path = args.db_path.unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = Arc::new(Mutex::new(Database::new(&db_path)?));
    info!("Database initialized at: {}", db_path.display());

    let store: Arc<dyn Persistence> = Arc::new(SqliteStore::new(db.clone()));
    let config = PipelineConfig::from_env();

    let generator = match LLMConfig::from_env_optional() {
        Some(llm_config) => {
            info!("Text generation: {:?} ({})", llm_config.provider, llm_config.model);
            Some(generator_from_config(llm_config)?)
        }
        None => None,
    };

    let (strategy, mut pipeline) =
        CapturePipeline::from_config(store.clone(), generator, config.clone());
    info!("Capture pipeline ready ({:?} extraction)", strategy);

    match TranscriptionConfig::from_env() {
        Ok(transcription) => {
            pipeline = pipeline.with_transcriber(Arc::new(HttpTranscriber::new(transcription)?));
            info!("Audio capture enabled");
        }
        Err(e) => warn!("Audio capture disabled: {}", e),
    }

    let state = AppState {
        db,
        store: store.clone(),
        pipeline: Arc::new(pipeline),
        reconciler: Arc::new(ReconciliationHandler::new(store, config.new_contact_tags)),
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    info!("Starting HTTP server on {}", args.bind);
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
