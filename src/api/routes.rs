use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/blocks", web::get().to(handlers::get_blocks))
        .route("/info", web::get().to(handlers::get_info))
        .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
        .route("/balance/{address}", web::get().to(handlers::get_balance))
        .route("/balance/{address}/{token_id}", web::get().to(handlers::get_token_balance))
        .route("/balances/{address}", web::get().to(handlers::get_all_balances))
        .route("/mine", web::post().to(handlers::mine_block))
        .route("/difficulty", web::post().to(handlers::set_difficulty))
        .route("/transact", web::post().to(handlers::new_transaction))
        .route("/tokens/create", web::post().to(handlers::create_token))
        .route("/tokens", web::get().to(handlers::get_tokens))
        .route("/tokens/{id}", web::get().to(handlers::get_token))
        .route("/peers", web::get().to(handlers::get_peers))
        .route("/peers", web::post().to(handlers::add_peer))
        .route("/validate", web::get().to(handlers::validate_chain))
        .route("/connection-info", web::get().to(handlers::connection_info));
}
