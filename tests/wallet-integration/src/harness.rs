use std::time::Duration;

use cowry_common::api::{
    CreateWalletRequest, CreateWalletResponse, ErrorResponse, InitializeTopUpResponse,
    TransferRequest, TransferResponse, VerifyTopUpRequest, VerifyTopUpResponse, WalletEvent,
};
use cowry_common::wallet::{LedgerEntry, Wallet};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::{fresh_uid, mint_token, provisioning_secret, service_url, ws_url};

const TIMEOUT: Duration = Duration::from_secs(5);

/// One authenticated user of the service under test.
#[derive(Clone)]
pub struct Participant {
    pub name: String,
    pub uid: String,
    pub token: String,
    http: reqwest::Client,
    base: String,
}

impl Participant {
    /// Create a run-unique identity and provision its wallet.
    pub async fn connect(name: &str) -> Self {
        let uid = fresh_uid(name);
        let participant = Self {
            name: name.to_string(),
            uid: uid.clone(),
            token: mint_token(&uid),
            http: reqwest::Client::builder()
                .timeout(TIMEOUT)
                .build()
                .expect("http client"),
            base: service_url(),
        };
        participant.provision().await;
        participant
    }

    /// Fire the provisioning trigger, as the identity provider would on
    /// user creation. Returns whether a wallet was created.
    pub async fn provision(&self) -> bool {
        let resp = self
            .http
            .post(format!("{}/internal/wallets", self.base))
            .header("x-provisioning-secret", provisioning_secret())
            .json(&CreateWalletRequest {
                uid: self.uid.clone(),
            })
            .send()
            .await
            .expect("provisioning request (is the service running?)");
        assert!(
            resp.status().is_success(),
            "provisioning {} failed: {}",
            self.name,
            resp.status()
        );
        resp.json::<CreateWalletResponse>()
            .await
            .expect("provisioning response")
            .created
    }

    pub async fn wallet(&self) -> Wallet {
        let resp = self
            .http
            .get(format!("{}/wallet", self.base))
            .bearer_auth(&self.token)
            .send()
            .await
            .expect("wallet request");
        assert!(
            resp.status().is_success(),
            "wallet read for {} failed: {}",
            self.name,
            resp.status()
        );
        resp.json().await.expect("wallet body")
    }

    pub async fn transactions(&self) -> Vec<LedgerEntry> {
        let resp = self
            .http
            .get(format!("{}/transactions", self.base))
            .bearer_auth(&self.token)
            .send()
            .await
            .expect("transactions request");
        assert!(resp.status().is_success());
        resp.json().await.expect("transactions body")
    }

    pub async fn initialize_topup(
        &self,
        amount: i64,
    ) -> Result<InitializeTopUpResponse, ErrorResponse> {
        let resp = self
            .http
            .post(format!("{}/topups/initialize", self.base))
            .bearer_auth(&self.token)
            .json(&json!({ "amount": amount, "email": format!("{}@example.com", self.uid) }))
            .send()
            .await
            .expect("initialize request");
        read_result(resp).await
    }

    pub async fn verify_topup(
        &self,
        reference: &str,
        amount: i64,
    ) -> Result<VerifyTopUpResponse, ErrorResponse> {
        let resp = self
            .http
            .post(format!("{}/topups/verify", self.base))
            .bearer_auth(&self.token)
            .json(&VerifyTopUpRequest {
                reference: reference.to_string(),
                amount,
            })
            .send()
            .await
            .expect("verify request");
        read_result(resp).await
    }

    /// Fund this wallet through the full gateway round trip. Requires the
    /// auto-settling paystack-stub.
    pub async fn fund(&self, amount: i64) {
        let session = self
            .initialize_topup(amount)
            .await
            .expect("initialize top-up (is the paystack-stub running?)");
        let verified = self
            .verify_topup(&session.reference, amount)
            .await
            .expect("verify top-up against the stub");
        assert!(verified.success);
    }

    pub async fn transfer(
        &self,
        to: &Participant,
        amount: i64,
    ) -> Result<TransferResponse, ErrorResponse> {
        let resp = self
            .http
            .post(format!("{}/transfers", self.base))
            .bearer_auth(&self.token)
            .json(&TransferRequest {
                to: to.uid.clone(),
                amount,
            })
            .send()
            .await
            .expect("transfer request");
        read_result(resp).await
    }

    /// Open the live subscription and complete the auth hello.
    pub async fn subscribe(&self) -> WsSubscription {
        let (mut stream, _) = connect_async(ws_url()).await.expect("ws connect");
        let hello = json!({ "token": self.token }).to_string();
        stream
            .send(Message::Text(hello.into()))
            .await
            .expect("ws hello");
        WsSubscription { stream }
    }
}

async fn read_result<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ErrorResponse> {
    if resp.status().is_success() {
        Ok(resp.json().await.expect("response body"))
    } else {
        Err(resp.json().await.expect("error body"))
    }
}

/// A live event stream for one participant.
pub struct WsSubscription {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsSubscription {
    /// Wait for the next wallet event, skipping transport frames.
    pub async fn recv_event(&mut self) -> WalletEvent {
        loop {
            let frame = tokio::time::timeout(TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for a wallet event")
                .expect("event stream ended")
                .expect("event stream errored");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).expect("wallet event json");
            }
        }
    }

    /// Wait until a `balance` event arrives and return the snapshot.
    pub async fn recv_balance(&mut self) -> Wallet {
        loop {
            if let WalletEvent::Balance { wallet } = self.recv_event().await {
                return wallet;
            }
        }
    }

    /// Wait until a `transaction` event arrives and return the entry.
    pub async fn recv_transaction(&mut self) -> LedgerEntry {
        loop {
            if let WalletEvent::Transaction { entry } = self.recv_event().await {
                return entry;
            }
        }
    }
}

/// Top-level fixture: two provisioned participants.
pub struct TestHarness {
    pub alice: Participant,
    pub bob: Participant,
}

impl TestHarness {
    pub async fn setup() -> Self {
        tracing_subscriber::fmt::try_init().ok();
        let alice = Participant::connect("alice").await;
        let bob = Participant::connect("bob").await;
        TestHarness { alice, bob }
    }
}
