use std::net::SocketAddr;
use std::sync::Arc;

use evokg_assistant::{
    evokg_toolkit, init_tracing, model_factory, openapi_toolkit, serve, AgentProfile, AppConfig,
    AssistantError, RemoteApiClient, SessionManager, ToolGateway,
};

#[tokio::main]
async fn main() -> evokg_assistant::Result<()> {
    let path = std::env::var("EVOKG_CONFIG").unwrap_or_else(|_| "evokg.toml".to_string());
    let cfg = AppConfig::from_env_or_file(&path)?;
    init_tracing("info", cfg.logging.json)?;

    let credentials = cfg.credentials();
    if !credentials.has_key() {
        tracing::warn!("no default model API key configured; sessions must supply their own");
    }

    let client = RemoteApiClient::new(cfg.knowledge_graph.remote_api())?;
    let kg = &cfg.knowledge_graph;
    let registry = if kg.uses_openapi() {
        openapi_toolkit(&client, &kg.spec_url, &kg.operations).await?
    } else {
        tracing::info!("no OpenAPI document configured; using the built-in tool catalog");
        evokg_toolkit()?
    };
    let gateway = ToolGateway::new(registry, client);
    let manager = SessionManager::new(
        AgentProfile::evokg(cfg.model.model.clone()),
        gateway,
        model_factory(cfg.model.clone())?,
        credentials,
    )
    .with_max_steps(cfg.agent.max_steps);

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|err| AssistantError::Config(format!("invalid listen address: {err}")))?;
    tracing::info!(config = %path, kg = %cfg.knowledge_graph.base_url, "starting Evo-KG assistant");
    serve(Arc::new(manager), addr).await
}
