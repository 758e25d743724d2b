use std::sync::Arc;

use tracing::info;

use agora_db::Database;
use agora_gateway::{ChatService, SessionRegistry};
use agora_server::{Config, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let addr = config.addr()?;

    let db = Database::open(&config.db_path, config.db_options())?;
    info!(
        "Database {} open with {} readers, query timeout {:?}",
        config.db_path.display(),
        config.db_readers,
        config.query_timeout
    );

    let chat = ChatService::new(Arc::new(db), SessionRegistry::new());
    let app = router(chat);

    info!("Agora server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
