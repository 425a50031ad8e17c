#![allow(dead_code)]

mod agent;
mod auth;
mod clock;
mod config;
mod db;
mod frame;
mod hub;
mod llm;
mod lww;
mod model;
mod mutation;
mod presence;
mod routes;
mod state;
mod store;

use llm::LlmChat as _;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let pool = db::init_pool(&database_url)
        .await
        .expect("database init failed");

    // LLM client is non-fatal: the agent endpoint reports itself as
    // unconfigured when the key is absent.
    let llm: Option<std::sync::Arc<dyn llm::LlmChat>> = match llm::LlmClient::from_env() {
        Ok(client) => {
            tracing::info!(model = client.model(), "LLM client initialized");
            Some(std::sync::Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM client not configured — board agent disabled");
            None
        }
    };

    let tracer = traces::Tracer::from_env();
    let store = store::Store::new(pool);

    // Spawn the background durability flush.
    let _flush = store::persist::spawn_flush_task(store.clone(), config::StoreConfig::from_env());

    let state = state::AppState::new(
        store,
        config::PresenceConfig::from_env(),
        config::AgentConfig::from_env(),
        llm,
        tracer,
    );

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "boardsync listening");
    axum::serve(listener, app).await.expect("server failed");
}
