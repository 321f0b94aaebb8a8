use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;
mod node;
mod p2p;

use config::Config;
use node::Node;
use p2p::P2PServer;

// Open the ledger from storage, or run in memory if the store is unusable
fn initialize_node(config: &Config) -> Node {
    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        warn!("Failed to create data directory: {}", e);
    }

    match Node::with_storage(&config.data_dir) {
        Ok(node) => {
            info!("Loaded blockchain from storage at {}", config.data_dir);
            node
        }
        Err(err) => {
            warn!("Failed to load blockchain from storage: {}", err);
            warn!("Creating in-memory blockchain instead");
            Node::new(blockchain::Blockchain::new(), None)
        }
    }
}

// Save the ledger every `AUTO_SAVE_SECS`
fn spawn_auto_save(node: Arc<Node>, config: &Config) {
    let Some(period) = config.auto_save_interval() else {
        info!("Auto-save disabled");
        return;
    };

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let node = node.clone();
            match tokio::task::spawn_blocking(move || node.save()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("Auto-save failed: {}", err),
                Err(err) => error!("Auto-save task failed: {}", err),
            }
        }
    });
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_blocks,
        api::handlers::get_info,
        api::handlers::get_pending_transactions,
        api::handlers::get_balance,
        api::handlers::get_token_balance,
        api::handlers::get_all_balances,
        api::handlers::mine_block,
        api::handlers::set_difficulty,
        api::handlers::new_transaction,
        api::handlers::create_token,
        api::handlers::get_tokens,
        api::handlers::get_token,
        api::handlers::get_peers,
        api::handlers::add_peer,
        api::handlers::validate_chain,
        api::handlers::connection_info
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::TransactionType,
            blockchain::TokenMetadata,
            api::handlers::ErrorResponse,
            api::handlers::MessageResponse,
            api::handlers::InfoResponse,
            api::handlers::BalanceResponse,
            api::handlers::TokenBalanceResponse,
            api::handlers::TokenBalance,
            api::handlers::BalancesResponse,
            api::handlers::MineRequest,
            api::handlers::MineResponse,
            api::handlers::DifficultyRequest,
            api::handlers::DifficultyResponse,
            api::handlers::TransactRequest,
            api::handlers::CreateTokenRequest,
            api::handlers::CreateTokenResponse,
            api::handlers::PeerRequest,
            api::handlers::ConnectionInfoResponse
        )
    ),
    tags(
        (name = "tokenchain", description = "Ledger node API endpoints")
    ),
    info(
        title = "Tokenchain API",
        version = "0.1.0",
        description = "Proof-of-work ledger node with custom tokens",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env();
    let node = Arc::new(initialize_node(&config));
    let peers = Arc::new(P2PServer::new(node.clone()));

    let listener = peers.clone();
    let p2p_address = config.p2p_address();
    tokio::spawn(async move {
        if let Err(err) = listener.listen(p2p_address).await {
            error!("P2P server failed: {}", err);
        }
    });
    peers.connect_to_peers(&config.peers);

    if node.has_storage() {
        spawn_auto_save(node.clone(), &config);
    }

    info!(
        "Starting HTTP server at http://{}:{}",
        config.http_host, config.http_port
    );

    let node_data = web::Data::from(node.clone());
    let peers_data = web::Data::from(peers);
    let config_data = web::Data::new(config.clone());

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(node_data.clone())
            .app_data(peers_data.clone())
            .app_data(config_data.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi())
            )
    })
    .bind((config.http_host.as_str(), config.http_port))
    .with_context(|| format!("failed to bind {}:{}", config.http_host, config.http_port))?
    .run()
    .await?;

    info!("Shutting down, saving blockchain");
    node.save().context("failed to save blockchain on shutdown")?;

    Ok(())
}
