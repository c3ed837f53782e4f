//! Minimal Paystack-compatible stub for integration runs.
//!
//! Speaks just enough of the gateway API for the wallet service:
//! `POST /transaction/initialize` and `GET /transaction/verify/{reference}`.
//! Every initialized reference auto-settles, so a verify immediately after
//! initialize reports a captured charge, so the harness "pays" nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Default)]
struct Stub {
    charges: Mutex<HashMap<String, Value>>,
    counter: Mutex<u64>,
}

async fn initialize_handler(
    State(stub): State<Arc<Stub>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let n = {
        let mut counter = stub.counter.lock().unwrap();
        *counter += 1;
        *counter
    };
    let reference = format!("stub-ref-{n}");

    stub.charges.lock().unwrap().insert(
        reference.clone(),
        json!({
            "status": "success",
            "amount": body["amount"],
            "metadata": body["metadata"],
        }),
    );

    Json(json!({
        "status": true,
        "message": "Authorization URL created",
        "data": {
            "authorization_url": "https://checkout.example/stub",
            "access_code": format!("stub-ac-{n}"),
            "reference": reference,
        }
    }))
}

async fn verify_handler(
    State(stub): State<Arc<Stub>>,
    Path(reference): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match stub.charges.lock().unwrap().get(&reference) {
        Some(charge) => Ok(Json(json!({
            "status": true,
            "message": "Verification successful",
            "data": charge,
        }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "status": false,
                "message": "Transaction reference not found",
            })),
        )),
    }
}

#[tokio::main]
async fn main() {
    let port: u16 = std::env::var("PAYSTACK_STUB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8900);

    let app = Router::new()
        .route("/transaction/initialize", post(initialize_handler))
        .route("/transaction/verify/{reference}", get(verify_handler))
        .with_state(Arc::new(Stub::default()));

    let addr = format!("0.0.0.0:{port}");
    println!("paystack-stub listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("stub server failed");
}
