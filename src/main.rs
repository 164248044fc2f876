use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use qwen_assistant::config::AppConfig;
use qwen_assistant::inference::qwen::QwenSource;
use qwen_assistant::inference::InferenceService;
use qwen_assistant::{build_app, init_tracing, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // -----------------------------
    // Logging
    // -----------------------------
    init_tracing();

    let config = AppConfig::from_env();
    info!(
        model = config.model.model_id.as_str(),
        device = %config.model.device,
        "starting Qwen assistant"
    );

    // -----------------------------
    // Shared state
    // -----------------------------
    let source = Arc::new(QwenSource::new(config.model.clone()));
    let infer = Arc::new(InferenceService::new(source));

    if config.preload_model {
        let warm = infer.clone();
        tokio::spawn(async move {
            match warm.get().await {
                Ok(generator) => info!(model = generator.model_name(), "model preloaded"),
                Err(err) => error!("model preload failed: {err:#}"),
            }
        });
    }

    let state = AppState {
        infer,
        model_name: config.model.model_id.clone(),
    };

    let app = build_app(state);

    let addr = config.bind_addr()?;
    info!("HTTP listening on http://{addr}");
    info!("WebSocket at ws://{addr}/ws");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
