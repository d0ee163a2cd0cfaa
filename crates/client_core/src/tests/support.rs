//! In-process socket backend shared by the feed and notification tests.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, watch},
    time::timeout,
};
use url::Url;

use crate::{
    session::NoSession,
    ws::{WsClient, WsOptions, WsStatus},
};

#[derive(Clone)]
struct BackendState {
    inbound: mpsc::UnboundedSender<String>,
    outbound: broadcast::Sender<String>,
}

pub struct SocketBackend {
    pub url: Url,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: broadcast::Sender<String>,
}

impl SocketBackend {
    pub async fn spawn() -> Self {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel(64);
        let state = BackendState {
            inbound: inbound_tx,
            outbound: outbound.clone(),
        };
        let app = Router::new().route("/ws", get(upgrade)).with_state(state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            url: Url::parse(&format!("ws://{addr}/ws")).expect("url"),
            inbound,
            outbound,
        }
    }

    pub fn push(&self, frame: Value) {
        let _ = self.outbound.send(frame.to_string());
    }

    pub async fn next_inbound(&mut self) -> Value {
        let text = timeout(Duration::from_secs(5), self.inbound.recv())
            .await
            .expect("inbound frame in time")
            .expect("backend alive");
        serde_json::from_str(&text).expect("client sends json")
    }

    /// Connects a fresh client and waits until the backend saw its register frame.
    pub async fn connected_client(&mut self) -> WsClient {
        let client = WsClient::new(
            WsOptions::new(self.url.clone(), "client-test"),
            Arc::new(NoSession),
        );
        client.connect().expect("connect");
        wait_connected(client.subscribe_status()).await;
        let register = self.next_inbound().await;
        assert_eq!(register["type"], "register");
        client
    }
}

async fn wait_connected(mut status: watch::Receiver<WsStatus>) {
    timeout(
        Duration::from_secs(5),
        status.wait_for(|status| *status == WsStatus::Connected),
    )
    .await
    .expect("connected in time")
    .expect("status channel open");
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<BackendState>) -> Response {
    ws.on_upgrade(move |socket| serve(socket, state))
}

async fn serve(socket: WebSocket, state: BackendState) {
    let mut outbound = state.outbound.subscribe();
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = state.inbound.send(text);
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            text = outbound.recv() => match text {
                Ok(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
        }
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached in time");
}
