mod completion;
mod handlers;
mod metrics;
mod routes;

use std::sync::Arc;

use campus_engine::config::{EngineConfig, LanguageRegistry};
use campus_engine::GradingEngine;
use completion::{CompletionSink, LogCompletionSink};
use tokio::net::TcpListener;
use tracing::info;

pub struct AppState {
    pub engine: GradingEngine,
    pub completions: Arc<dyn CompletionSink>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Campus grading API booting...");

    let config = EngineConfig::from_env();
    let languages = LanguageRegistry::load_default();
    info!("Configured languages: {:?}", languages.list());

    let engine = GradingEngine::new(config, languages);
    let state = Arc::new(AppState {
        engine,
        completions: Arc::new(LogCompletionSink),
    });

    let app = routes::routes().with_state(state);

    let addr =
        std::env::var("CAMPUS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("HTTP server listening on {}", addr);
    info!("Ready to grade submissions");

    axum::serve(listener, app).await.expect("Server error");
}
