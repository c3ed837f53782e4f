//! Cowry wallet/ledger service daemon.
//!
//! HTTP front door for the money subsystem of the Cowry community app:
//! wallet provisioning on signup, Paystack-funded top-ups, peer-to-peer
//! transfers, and live balance/transaction subscriptions over WebSocket.
//! All shared state lives in the ledger store; request handlers are
//! stateless and run concurrently, serialized only by the store's atomic
//! transactions.

mod events;
mod paystack;
mod service;
mod store;
mod store_pg;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use clap::Parser;
use cowry_common::api::{
    CreateWalletRequest, CreateWalletResponse, ErrorResponse, HealthResponse,
    InitializeTopUpRequest, InitializeTopUpResponse, SubscribeRequest, TransferRequest,
    TransferResponse, VerifyTopUpRequest, VerifyTopUpResponse, WalletEvent,
};
use cowry_common::auth::{verify_token, verifying_key_from_hex, AuthClaims};
use cowry_common::currency::Currency;
use cowry_common::wallet::{LedgerEntry, Wallet};
use ed25519_dalek::VerifyingKey;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::paystack::PaystackGateway;
use crate::service::{WalletError, WalletService};
use crate::store::{LedgerStore, MemStore};
use crate::store_pg::PgStore;

#[derive(Parser)]
#[command(name = "cowry-wallet", about = "Cowry wallet/ledger service")]
struct Cli {
    /// HTTP port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Postgres connection URL. Omitted → in-memory dev store.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Paystack secret key. Server-held; never exposed to clients.
    #[arg(long, env = "PAYSTACK_SECRET_KEY", default_value = "")]
    paystack_secret_key: String,

    /// Paystack API base URL (point at a stub for tests).
    #[arg(long, default_value = "https://api.paystack.co")]
    paystack_base_url: String,

    /// Bound on every gateway call, in seconds.
    #[arg(long, default_value_t = 15)]
    gateway_timeout_secs: u64,

    /// Hex-encoded ed25519 verifying key of the identity provider.
    /// Omitted → fixed dev key (accepts harness-minted tokens only).
    #[arg(long, env = "COWRY_AUTH_KEY")]
    auth_key: Option<String>,

    /// Shared secret guarding the wallet provisioning trigger.
    #[arg(long, env = "COWRY_PROVISIONING_SECRET", default_value = "dev-secret")]
    provisioning_secret: String,

    /// Currency for newly provisioned wallets.
    #[arg(long, default_value = "NGN")]
    currency: Currency,
}

struct AppState {
    service: WalletService,
    auth_key: VerifyingKey,
    provisioning_secret: String,
}

// ─── Auth & error plumbing ───────────────────────────────────────────────────

/// Resolve the caller's identity from the Authorization header. The uid in
/// the verified claims is the only caller identity the service ever uses.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthClaims, WalletError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WalletError::Unauthenticated("missing Authorization header".to_string()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| WalletError::Unauthenticated("expected a bearer token".to_string()))?;
    verify_token(token, &state.auth_key, Utc::now())
        .map_err(|e| WalletError::Unauthenticated(e.to_string()))
}

fn reject(err: WalletError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        WalletError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        WalletError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        WalletError::FailedPrecondition(_) => StatusCode::CONFLICT,
        WalletError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
        WalletError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.code(),
        }),
    )
}

type Rejection = (StatusCode, Json<ErrorResponse>);

// ─── Wallet handlers ─────────────────────────────────────────────────────────

async fn initialize_topup_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<InitializeTopUpRequest>,
) -> Result<Json<InitializeTopUpResponse>, Rejection> {
    let caller = authenticate(&state, &headers).map_err(reject)?;
    state
        .service
        .initialize_topup(&caller, req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn verify_topup_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<VerifyTopUpRequest>,
) -> Result<Json<VerifyTopUpResponse>, Rejection> {
    let caller = authenticate(&state, &headers).map_err(reject)?;
    state
        .service
        .verify_topup(&caller, req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn transfer_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, Rejection> {
    let caller = authenticate(&state, &headers).map_err(reject)?;
    state
        .service
        .transfer(&caller, req)
        .await
        .map(Json)
        .map_err(reject)
}

async fn wallet_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Wallet>, Rejection> {
    let caller = authenticate(&state, &headers).map_err(reject)?;
    state.service.wallet(&caller).await.map(Json).map_err(reject)
}

async fn transactions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<LedgerEntry>>, Rejection> {
    let caller = authenticate(&state, &headers).map_err(reject)?;
    state
        .service
        .transactions(&caller)
        .await
        .map(Json)
        .map_err(reject)
}

// ─── Provisioning trigger ────────────────────────────────────────────────────

/// Fired by the identity provider when a user account is created. Guarded
/// by a shared secret, not a user bearer token; there is no client-facing
/// surface for wallet creation.
async fn create_wallet_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateWalletRequest>,
) -> Result<Json<CreateWalletResponse>, Rejection> {
    let provided = headers
        .get("x-provisioning-secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if state.provisioning_secret.is_empty() || provided != state.provisioning_secret {
        return Err(reject(WalletError::Unauthenticated(
            "invalid provisioning secret".to_string(),
        )));
    }
    let created = state.service.create_wallet(&req.uid).await.map_err(reject)?;
    Ok(Json(CreateWalletResponse { created }))
}

// ─── Health ──────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        store_ready: state.service.store_ready().await,
        gateway_configured: state.service.gateway_configured(),
    })
}

// ─── Live subscriptions ──────────────────────────────────────────────────────

async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_subscription(socket, state))
}

/// One WebSocket subscription: authenticate via the first frame, push an
/// initial balance snapshot, then forward events until either side hangs
/// up. Dropping the socket only ends the subscription; the ledger is
/// untouched.
async fn serve_subscription(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut frames) = socket.split();

    let first = match frames.next().await {
        Some(Ok(Message::Text(text))) => text,
        _ => return,
    };
    let claims = match serde_json::from_str::<SubscribeRequest>(&first)
        .ok()
        .and_then(|req| verify_token(&req.token, &state.auth_key, Utc::now()).ok())
    {
        Some(claims) => claims,
        None => {
            warn!("ws subscription rejected: bad hello frame");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let mut events = BroadcastStream::new(state.service.events().subscribe(&claims.sub));
    info!(uid = %claims.sub, "ws subscription opened");

    // Initial snapshot so the client renders without racing the next event.
    if let Ok(wallet) = state.service.wallet(&claims).await {
        if send_event(&mut sink, &WalletEvent::Balance { wallet })
            .await
            .is_err()
        {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(event)) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(uid = %claims.sub, skipped, "ws subscriber lagged, resyncing snapshot");
                    if let Ok(wallet) = state.service.wallet(&claims).await {
                        if send_event(&mut sink, &WalletEvent::Balance { wallet })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
                None => break,
            },
            msg = frames.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {} // pings and client chatter
            },
        }
    }
    info!(uid = %claims.sub, "ws subscription closed");
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &WalletEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).expect("event serialization should not fail");
    sink.send(Message::Text(json.into())).await
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let auth_key = match &cli.auth_key {
        Some(hex) => verifying_key_from_hex(hex).map_err(|e| anyhow!("--auth-key: {e}"))?,
        None => {
            warn!("no --auth-key; accepting tokens from the fixed dev identity key only");
            cowry_common::auth::dev_identity_signing_key().verifying_key()
        }
    };

    if cli.paystack_secret_key.is_empty() {
        warn!("no Paystack secret key configured; top-ups will fail at the gateway");
    }
    let gateway = PaystackGateway::new(
        &cli.paystack_base_url,
        &cli.paystack_secret_key,
        Duration::from_secs(cli.gateway_timeout_secs),
    )
    .map_err(|e| anyhow!("gateway client: {e}"))?;

    let store: Arc<dyn LedgerStore> = match &cli.database_url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .map_err(|e| anyhow!("postgres: {e}"))?;
            info!("using the Postgres ledger store");
            Arc::new(store)
        }
        None => {
            warn!("no --database-url; using the in-memory dev store (state is lost on exit)");
            Arc::new(MemStore::new())
        }
    };

    let service = WalletService::new(store, Arc::new(gateway), cli.currency);
    let state = Arc::new(AppState {
        service,
        auth_key,
        provisioning_secret: cli.provisioning_secret,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/topups/initialize", post(initialize_topup_handler))
        .route("/topups/verify", post(verify_topup_handler))
        .route("/transfers", post(transfer_handler))
        .route("/wallet", get(wallet_handler))
        .route("/transactions", get(transactions_handler))
        .route("/ws", get(ws_handler))
        .route("/internal/wallets", post(create_wallet_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", cli.port);
    info!("cowry-wallet listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind")?;
    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
