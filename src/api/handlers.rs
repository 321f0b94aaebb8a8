use std::fmt::Display;

use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{
    Block, TokenMetadata, Transaction, TransactionType, MAX_DIFFICULTY, MIN_DIFFICULTY, NATIVE_TOKEN,
};
use crate::config::Config;
use crate::node::{Node, NodeError};
use crate::p2p::P2PServer;

/// The node shared by every worker
pub type NodeData = web::Data<Node>;

/// The peer server shared by every worker
pub type PeersData = web::Data<P2PServer>;

/// Body of every failed request
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// What went wrong
    pub error: String,
}

fn bad_request(error: impl Display) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: error.to_string(),
    })
}

/// Generic acknowledgement
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

/// Get the full blockchain
///
/// Returns every block from genesis to the tip
#[utoipa::path(
    get,
    path = "/blocks",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = Vec<Block>)
    )
)]
pub async fn get_blocks(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.chain())
}

/// Node statistics
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub circulating_supply: f64,
    pub max_supply: f64,
    pub difficulty: u32,
    pub mining_reward: f64,
    /// Number of connected peers
    pub peers: usize,
    pub chain_length: usize,
    pub pending_transactions: usize,
    /// Number of registered tokens
    pub tokens: usize,
    pub is_valid: bool,
}

/// Get node statistics
///
/// Returns supply, difficulty and peer figures of this node
#[utoipa::path(
    get,
    path = "/info",
    responses(
        (status = 200, description = "Node statistics", body = InfoResponse)
    )
)]
pub async fn get_info(node: NodeData, peers: PeersData) -> impl Responder {
    let info = node.with_ledger(|ledger| InfoResponse {
        circulating_supply: ledger.circulating_supply(),
        max_supply: ledger.max_supply(),
        difficulty: ledger.difficulty(),
        mining_reward: ledger.mining_reward(),
        peers: peers.peer_count(),
        chain_length: ledger.chain().len(),
        pending_transactions: ledger.pending_transactions().len(),
        tokens: ledger.get_token_registry().len(),
        is_valid: ledger.is_chain_valid(),
    });

    HttpResponse::Ok().json(info)
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(node: NodeData) -> impl Responder {
    let transactions = node.with_ledger(|ledger| ledger.pending_transactions().to_vec());
    HttpResponse::Ok().json(transactions)
}

/// Native balance of an address
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: f64,
}

/// Get native balance
///
/// Returns the mined native balance of an address
#[utoipa::path(
    get,
    path = "/balance/{address}",
    params(
        ("address" = String, Path, description = "Address to look up")
    ),
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse)
    )
)]
pub async fn get_balance(node: NodeData, address: web::Path<String>) -> impl Responder {
    let address = address.into_inner();
    let balance = node.with_ledger(|ledger| ledger.get_balance(&address, NATIVE_TOKEN));

    HttpResponse::Ok().json(BalanceResponse { address, balance })
}

/// Balance of an address in one token
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalanceResponse {
    pub address: String,
    pub token_id: String,
    pub balance: f64,
    /// Token symbol, `UNKNOWN` for unregistered ids
    pub symbol: String,
}

/// Get token balance
///
/// Returns the mined balance of an address in a single token
#[utoipa::path(
    get,
    path = "/balance/{address}/{token_id}",
    params(
        ("address" = String, Path, description = "Address to look up"),
        ("token_id" = String, Path, description = "Token id, NATIVE for the native token")
    ),
    responses(
        (status = 200, description = "Balance retrieved successfully", body = TokenBalanceResponse)
    )
)]
pub async fn get_token_balance(node: NodeData, path: web::Path<(String, String)>) -> impl Responder {
    let (address, token_id) = path.into_inner();
    let (balance, symbol) = node.with_ledger(|ledger| {
        (
            ledger.get_balance(&address, &token_id),
            ledger.get_token_registry().symbol(&token_id).to_string(),
        )
    });

    HttpResponse::Ok().json(TokenBalanceResponse {
        address,
        token_id,
        balance,
        symbol,
    })
}

/// One entry of an address portfolio
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub token_id: String,
    pub balance: f64,
    pub symbol: String,
}

/// Every balance held by an address
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalancesResponse {
    pub address: String,
    pub balances: Vec<TokenBalance>,
}

/// Get all balances
///
/// Returns the native balance and every non-zero token balance of an address
#[utoipa::path(
    get,
    path = "/balances/{address}",
    params(
        ("address" = String, Path, description = "Address to look up")
    ),
    responses(
        (status = 200, description = "Balances retrieved successfully", body = BalancesResponse)
    )
)]
pub async fn get_all_balances(node: NodeData, address: web::Path<String>) -> impl Responder {
    let address = address.into_inner();
    let mut balances: Vec<TokenBalance> = node.with_ledger(|ledger| {
        ledger
            .get_all_token_balances(&address)
            .into_iter()
            .map(|(token_id, balance)| TokenBalance {
                symbol: ledger.get_token_registry().symbol(&token_id).to_string(),
                token_id,
                balance,
            })
            .collect()
    });
    // native first, then by id
    balances.sort_by(|a, b| {
        (a.token_id != NATIVE_TOKEN, &a.token_id).cmp(&(b.token_id != NATIVE_TOKEN, &b.token_id))
    });

    HttpResponse::Ok().json(BalancesResponse { address, balances })
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MineRequest {
    /// The miner's address
    pub miner_address: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub success: bool,
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Mine a new block
///
/// Mines up to five pending transactions plus the reward and announces the
/// new chain to every peer
#[utoipa::path(
    post,
    path = "/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Nothing to mine or mining failed", body = ErrorResponse)
    )
)]
pub async fn mine_block(
    node: NodeData,
    peers: PeersData,
    mine_req: web::Json<MineRequest>,
) -> impl Responder {
    let miner_address = mine_req.miner_address.trim();
    if miner_address.is_empty() {
        return bad_request("Miner address is required");
    }

    match node.mine(miner_address).await {
        Ok(Some(block)) => {
            peers.broadcast_chain();
            HttpResponse::Ok().json(MineResponse {
                success: true,
                message: "Block mined successfully".to_string(),
                block,
            })
        }
        Ok(None) => bad_request("No pending transactions to mine"),
        Err(err @ NodeError::MiningAborted) => bad_request(err),
        Err(err) => bad_request(format!("Failed to mine block: {}", err)),
    }
}

/// Request for the difficulty endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DifficultyRequest {
    /// Number of leading zero hex digits, from 1 to 64
    pub difficulty: i64,
}

/// Response for the difficulty endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DifficultyResponse {
    pub success: bool,
    pub message: String,
    pub difficulty: u32,
}

/// Set the mining difficulty
///
/// Overrides the current difficulty until the next retarget
#[utoipa::path(
    post,
    path = "/difficulty",
    request_body = DifficultyRequest,
    responses(
        (status = 200, description = "Difficulty updated", body = DifficultyResponse),
        (status = 400, description = "Difficulty outside 1..=64", body = ErrorResponse)
    )
)]
pub async fn set_difficulty(node: NodeData, req: web::Json<DifficultyRequest>) -> impl Responder {
    let difficulty = match u32::try_from(req.difficulty) {
        Ok(difficulty) if difficulty >= MIN_DIFFICULTY => difficulty,
        _ => return bad_request("Valid difficulty (positive number) is required"),
    };
    if difficulty > MAX_DIFFICULTY {
        return bad_request(format!(
            "Difficulty must be between {} and {}",
            MIN_DIFFICULTY, MAX_DIFFICULTY
        ));
    }

    node.set_difficulty(difficulty);
    HttpResponse::Ok().json(DifficultyResponse {
        success: true,
        message: format!("Difficulty updated to {}", difficulty),
        difficulty,
    })
}

/// Request for the transact endpoint
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactRequest {
    /// The sender's address
    pub from: String,

    /// The recipient's address
    pub to: String,

    /// The amount to transfer
    #[serde(default)]
    pub amount: f64,

    pub message: Option<String>,

    /// Token to transfer, NATIVE when absent
    pub token_id: Option<String>,

    /// TRANSFER (default) or MESSAGE
    #[serde(rename = "type")]
    pub tx_type: Option<TransactionType>,
}

/// Submit a transaction
///
/// Queues a transfer or a message and relays it to every peer
#[utoipa::path(
    post,
    path = "/transact",
    request_body = TransactRequest,
    responses(
        (status = 200, description = "Transaction queued", body = MessageResponse),
        (status = 400, description = "Invalid transaction or insufficient balance", body = ErrorResponse)
    )
)]
pub async fn new_transaction(
    node: NodeData,
    peers: PeersData,
    req: web::Json<TransactRequest>,
) -> impl Responder {
    let req = req.into_inner();
    let tx_type = req.tx_type.unwrap_or_default();

    let transaction = match tx_type {
        TransactionType::Transfer => Transaction::transfer(req.from, req.to, req.amount),
        TransactionType::Message => Transaction {
            amount: req.amount,
            ..Transaction::message(req.from, req.to, String::new())
        },
        other => return bad_request(format!("{:?} transactions cannot be submitted", other)),
    }
    .with_message(req.message.unwrap_or_default())
    .with_token(req.token_id.unwrap_or_else(|| NATIVE_TOKEN.to_string()));

    if let Err(err) = node.create_transaction(transaction.clone()) {
        return bad_request(err);
    }
    peers.broadcast_transaction(transaction);

    let message = match tx_type {
        TransactionType::Message => "Message sent",
        _ => "Transaction created",
    };
    HttpResponse::Ok().json(MessageResponse {
        success: true,
        message: message.to_string(),
    })
}

/// Request for the token creation endpoint
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenRequest {
    pub name: String,
    pub symbol: String,
    pub initial_supply: f64,

    /// Address credited with the initial supply
    pub creator: String,
}

/// Response for the token creation endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateTokenResponse {
    pub success: bool,
    pub token: TokenMetadata,
}

/// Create a token
///
/// Registers a new token and queues the transaction crediting its initial
/// supply to the creator
#[utoipa::path(
    post,
    path = "/tokens/create",
    request_body = CreateTokenRequest,
    responses(
        (status = 200, description = "Token created", body = CreateTokenResponse),
        (status = 400, description = "Missing fields or duplicate token", body = ErrorResponse)
    )
)]
pub async fn create_token(
    node: NodeData,
    peers: PeersData,
    req: web::Json<CreateTokenRequest>,
) -> impl Responder {
    let fields = [&req.name, &req.symbol, &req.creator];
    if fields.iter().any(|field| field.trim().is_empty())
        || !req.initial_supply.is_finite()
        || req.initial_supply <= 0.0
    {
        return bad_request("Missing required fields");
    }

    match node.create_token(&req.name, &req.symbol, req.initial_supply, &req.creator) {
        Ok((token, transaction)) => {
            peers.broadcast_transaction(transaction);
            HttpResponse::Ok().json(CreateTokenResponse {
                success: true,
                token,
            })
        }
        Err(err) => bad_request(err),
    }
}

/// List tokens
///
/// Returns every registered token, oldest first
#[utoipa::path(
    get,
    path = "/tokens",
    responses(
        (status = 200, description = "Registered tokens", body = Vec<TokenMetadata>)
    )
)]
pub async fn get_tokens(node: NodeData) -> impl Responder {
    let tokens = node.with_ledger(|ledger| ledger.get_token_registry().all_tokens());
    HttpResponse::Ok().json(tokens)
}

/// Get a token
#[utoipa::path(
    get,
    path = "/tokens/{id}",
    params(
        ("id" = String, Path, description = "Token id")
    ),
    responses(
        (status = 200, description = "Token found", body = TokenMetadata),
        (status = 404, description = "Token not found", body = ErrorResponse)
    )
)]
pub async fn get_token(node: NodeData, id: web::Path<String>) -> impl Responder {
    let token = node.with_ledger(|ledger| ledger.get_token_registry().get_token(&id).cloned());

    match token {
        Some(token) => HttpResponse::Ok().json(token),
        None => HttpResponse::NotFound().json(ErrorResponse {
            error: "Token not found".to_string(),
        }),
    }
}

/// List peers
///
/// Returns the address of every connected peer
#[utoipa::path(
    get,
    path = "/peers",
    responses(
        (status = 200, description = "Connected peers", body = Vec<String>)
    )
)]
pub async fn get_peers(peers: PeersData) -> impl Responder {
    HttpResponse::Ok().json(peers.peer_addresses())
}

/// Request for the add peer endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PeerRequest {
    /// Peer URL, e.g. ws://10.0.0.2:6001
    pub peer: String,
}

/// Connect to a peer
///
/// Dials the peer in the background; the chains are exchanged once the
/// connection opens
#[utoipa::path(
    post,
    path = "/peers",
    request_body = PeerRequest,
    responses(
        (status = 200, description = "Connection started", body = MessageResponse),
        (status = 400, description = "Missing peer address", body = ErrorResponse)
    )
)]
pub async fn add_peer(peers: PeersData, req: web::Json<PeerRequest>) -> impl Responder {
    let peer = req.peer.trim();
    if peer.is_empty() {
        return bad_request("Peer address is required");
    }

    peers.into_inner().connect_to_peers(&[peer.to_string()]);
    HttpResponse::Ok().json(MessageResponse {
        success: true,
        message: "Connected to peer".to_string(),
    })
}

/// Check if the blockchain is valid
///
/// Recomputes every block hash and checks the links between blocks
#[utoipa::path(
    get,
    path = "/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(node: NodeData) -> impl Responder {
    let is_valid = node.with_ledger(|ledger| ledger.is_chain_valid());
    HttpResponse::Ok().json(is_valid)
}

/// How to reach this node
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfoResponse {
    pub http_port: u16,
    pub p2p_port: u16,
    pub peers: usize,
    pub message: String,
}

/// Get connection details
#[utoipa::path(
    get,
    path = "/connection-info",
    responses(
        (status = 200, description = "Connection details", body = ConnectionInfoResponse)
    )
)]
pub async fn connection_info(config: web::Data<Config>, peers: PeersData) -> impl Responder {
    HttpResponse::Ok().json(ConnectionInfoResponse {
        http_port: config.http_port,
        p2p_port: config.p2p_port,
        peers: peers.peer_count(),
        message: format!("Connect to this node using: ws://YOUR_IP:{}", config.p2p_port),
    })
}
